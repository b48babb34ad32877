//! Command extraction and dispatch integration tests

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hearth_gateway::command::dispatch::{CallState, Effect, normalize_phone, wa_me_url};
use hearth_gateway::{ActionCommand, CommandDispatcher, extract_command, strip_command_fence};

mod common;
use common::{CapturingOpener, directory_with_contacts, fast_dispatch_config};

/// Collect effects until the channel stays quiet for `quiet` milliseconds
async fn collect_effects(rx: &mut mpsc::UnboundedReceiver<Effect>, quiet: u64) -> Vec<Effect> {
    let mut effects = Vec::new();
    while let Ok(Some(effect)) =
        tokio::time::timeout(Duration::from_millis(quiet), rx.recv()).await
    {
        effects.push(effect);
    }
    effects
}

fn dispatcher_with(
    config: hearth_gateway::config::DispatchConfig,
    contacts: serde_json::Value,
) -> (
    tempfile::TempDir,
    Arc<CapturingOpener>,
    CancellationToken,
    CommandDispatcher,
    mpsc::UnboundedReceiver<Effect>,
) {
    let (dir, directory) = directory_with_contacts(contacts);
    let opener = Arc::new(CapturingOpener::default());
    let (effects_tx, effects_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let dispatcher = CommandDispatcher::new(
        config,
        directory,
        Arc::clone(&opener) as Arc<dyn hearth_gateway::LinkOpener>,
        effects_tx,
        cancel.clone(),
    );
    (dir, opener, cancel, dispatcher, effects_rx)
}

#[test]
fn extraction_matches_the_wire_convention() {
    let text = "Ok! ```json\n{\"action\":\"whatsapp\",\"contact\":\"Cris\",\"message\":\"oi\"}\n```";

    let command = extract_command(text).expect("command expected");
    assert_eq!(
        command,
        ActionCommand::Whatsapp {
            contact: "Cris".to_string(),
            message: "oi".to_string(),
        }
    );
    assert_eq!(strip_command_fence(text), "Ok!");
}

#[test]
fn malformed_fence_dispatches_nothing() {
    assert!(extract_command("```json\n{not valid}\n```").is_none());
}

#[test]
fn contact_lookup_is_case_insensitive_substring() {
    let (_dir, directory) = directory_with_contacts(serde_json::json!([
        {"id": 1, "name": "Cristina", "whatsapp": "+5511912345678"}
    ]));

    assert_eq!(directory.resolve("cris").unwrap().name, "Cristina");
    assert_eq!(directory.resolve("TINA").unwrap().name, "Cristina");
    assert!(directory.resolve("unknown_name").is_none());
}

#[test]
fn normalization_is_shared_between_messaging_and_calling() {
    let normalized = normalize_phone("(11) 91234-5678", "55");
    assert_eq!(normalized, "+5511912345678");
    assert_eq!(
        wa_me_url(&normalized, "oi"),
        "https://wa.me/5511912345678?text=oi"
    );
}

#[tokio::test]
async fn whatsapp_command_opens_deep_link_after_delay() {
    let (_dir, opener, _cancel, dispatcher, mut effects_rx) = dispatcher_with(
        fast_dispatch_config(),
        serde_json::json!([
            {"id": 1, "name": "Cristina", "whatsapp": "+5511912345678"}
        ]),
    );

    dispatcher.dispatch(ActionCommand::Whatsapp {
        contact: "cris".to_string(),
        message: "oi, tudo bem?".to_string(),
    });

    // Nothing fires before the confirmation delay
    assert!(opener.opened().is_empty());

    let effects = collect_effects(&mut effects_rx, 200).await;
    let opened = opener.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(
        opened[0],
        "https://wa.me/5511912345678?text=oi%2C%20tudo%20bem%3F"
    );
    assert!(matches!(
        effects.as_slice(),
        [Effect::MessagingLinkOpened { contact, .. }] if contact == "Cristina"
    ));
}

#[tokio::test]
async fn unresolved_contact_signals_contacts_screen() {
    let (_dir, opener, _cancel, dispatcher, mut effects_rx) = dispatcher_with(
        fast_dispatch_config(),
        serde_json::json!([{"id": 1, "name": "Cristina"}]),
    );

    dispatcher.dispatch(ActionCommand::Whatsapp {
        contact: "unknown_name".to_string(),
        message: "oi".to_string(),
    });

    let effects = collect_effects(&mut effects_rx, 200).await;
    assert!(opener.opened().is_empty(), "no link for an unknown contact");
    assert_eq!(
        effects,
        vec![Effect::Navigate {
            view: "family".to_string()
        }]
    );
}

#[tokio::test]
async fn cancelled_dispatch_never_fires() {
    let (_dir, opener, cancel, dispatcher, mut effects_rx) = dispatcher_with(
        fast_dispatch_config(),
        serde_json::json!([
            {"id": 1, "name": "Cristina", "whatsapp": "+5511912345678"}
        ]),
    );

    dispatcher.dispatch(ActionCommand::Whatsapp {
        contact: "cris".to_string(),
        message: "oi".to_string(),
    });
    cancel.cancel();

    let effects = collect_effects(&mut effects_rx, 200).await;
    assert!(effects.is_empty(), "cancelled effects must not fire");
    assert!(opener.opened().is_empty());
}

#[tokio::test]
async fn call_without_telephony_runs_simulated_progression() {
    let (_dir, _opener, _cancel, dispatcher, mut effects_rx) = dispatcher_with(
        fast_dispatch_config(),
        serde_json::json!([
            {"id": 1, "name": "Cristina", "phone": "+5511912345678"}
        ]),
    );

    dispatcher.dispatch(ActionCommand::Call {
        contact: "cris".to_string(),
        context: None,
    });

    let effects = collect_effects(&mut effects_rx, 300).await;
    assert_eq!(
        effects,
        vec![
            Effect::Call(CallState::Dialing {
                contact: "Cristina".to_string()
            }),
            Effect::Call(CallState::Connected {
                contact: "Cristina".to_string(),
                simulated: true
            }),
            Effect::Call(CallState::PremiumUpsell {
                feature: "Autonomous AI Calling".to_string()
            }),
            Effect::Call(CallState::Ended),
        ]
    );
}

#[tokio::test]
async fn call_with_real_telephony_connects_and_skips_upsell() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/call"))
        .and(body_partial_json(
            serde_json::json!({"to": "+5511912345678"}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "mode": "real",
            "sid": "CA123"
        })))
        .mount(&server)
        .await;

    let mut config = fast_dispatch_config();
    config.telephony_endpoint = Some(format!("{}/call", server.uri()));

    let (_dir, _opener, _cancel, dispatcher, mut effects_rx) = dispatcher_with(
        config,
        serde_json::json!([
            {"id": 1, "name": "Cristina", "phone": "+5511912345678"}
        ]),
    );

    dispatcher.dispatch(ActionCommand::Call {
        contact: "cris".to_string(),
        context: Some("remind her about dinner".to_string()),
    });

    let effects = collect_effects(&mut effects_rx, 300).await;
    assert_eq!(
        effects,
        vec![
            Effect::Call(CallState::Dialing {
                contact: "Cristina".to_string()
            }),
            Effect::Call(CallState::Connected {
                contact: "Cristina".to_string(),
                simulated: false
            }),
        ]
    );
}

#[tokio::test]
async fn failing_telephony_falls_back_to_simulation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/call"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut config = fast_dispatch_config();
    config.telephony_endpoint = Some(format!("{}/call", server.uri()));

    let (_dir, _opener, _cancel, dispatcher, mut effects_rx) = dispatcher_with(
        config,
        serde_json::json!([
            {"id": 1, "name": "Cristina", "phone": "+5511912345678"}
        ]),
    );

    dispatcher.dispatch(ActionCommand::Call {
        contact: "cris".to_string(),
        context: None,
    });

    let effects = collect_effects(&mut effects_rx, 300).await;
    assert_eq!(effects.len(), 4, "dialing, connected, upsell, ended: {effects:?}");
    assert!(matches!(
        effects[1],
        Effect::Call(CallState::Connected { simulated: true, .. })
    ));
}
