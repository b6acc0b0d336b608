mod common;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use boardgame_buddy::agent::{Agent, AgentPolicy};
use boardgame_buddy::config::{AgentConfig, UiConfig};
use boardgame_buddy::error::BuddyError;
use boardgame_buddy::session::{ScriptedLines, Session, SessionEnd, TeardownGuard};
use boardgame_buddy::tools::{SearchDocumentsTool, ToolRegistry};

use common::*;

const GREETING: &str = "Bonjour, je suis Buddy, ton expert en jeux de plateau !";

async fn session_with(tmp: &TempDir, steps: Vec<Step>) -> (Session<Vec<u8>>, Arc<ScriptedChat>) {
    let chat = Arc::new(ScriptedChat::new(steps));
    let settings = settings_with(chat.clone());
    let engine = engine(&tmp.path().join("storage"), &settings).await;
    let policy = AgentPolicy::from_config(&AgentConfig::default(), SearchDocumentsTool::NAME);
    let agent = Agent::new(&settings, ToolRegistry::with_retrieval(engine), policy);
    (Session::new(agent, UiConfig::default(), Vec::new()), chat)
}

fn output(session: &Session<Vec<u8>>) -> String {
    String::from_utf8(session.output().clone()).unwrap()
}

#[tokio::test]
async fn test_exit_command_is_case_insensitive() {
    for variant in ["EXIT", "exit", "Exit", "  eXiT  "] {
        let tmp = TempDir::new().unwrap();
        let (mut session, chat) = session_with(&tmp, vec![reply(GREETING)]).await;
        let mut lines = ScriptedLines::new([variant, "Et Catan ?"]);

        let end = session.run(&mut lines).await.unwrap();
        assert_eq!(end, SessionEnd::ExitCommand, "variant {:?}", variant);
        assert_eq!(chat.request_count(), 1, "only the greeting reaches the model");

        let out = output(&session);
        assert!(out.contains(&format!("Buddy : {}", GREETING)));
        assert!(out.contains("Tapez 'EXIT' pour quitter la conversation."));
        assert!(out.trim_end().ends_with("Au revoir et à bientôt !"));
    }
}

#[tokio::test]
async fn test_other_input_is_a_turn() {
    let tmp = TempDir::new().unwrap();
    let (mut session, chat) = session_with(
        &tmp,
        vec![
            reply(GREETING),
            reply("Je suis spécialisé dans les jeux de plateau. Comment puis-je t'aider ?"),
        ],
    )
    .await;
    let mut lines = ScriptedLines::new(["exits"]);

    let end = session.run(&mut lines).await.unwrap();
    assert_eq!(end, SessionEnd::EndOfInput);
    assert_eq!(chat.request_count(), 2);
    assert_eq!(session.context().len(), 4);
    assert!(output(&session).contains("Buddy : Je suis spécialisé dans les jeux de plateau."));
    assert!(output(&session).contains("Au revoir et à bientôt !"));
}

#[tokio::test]
async fn test_empty_lines_are_ignored() {
    let tmp = TempDir::new().unwrap();
    let (mut session, chat) = session_with(&tmp, vec![reply(GREETING)]).await;
    let mut lines = ScriptedLines::new(["", "   ", "\n"]);

    session.run(&mut lines).await.unwrap();
    assert_eq!(chat.request_count(), 1);
    assert_eq!(session.context().len(), 2);
    assert_eq!(output(&session).matches("Buddy : ").count(), 1);
    assert_eq!(output(&session).matches("Vous : ").count(), 4);
}

#[tokio::test]
async fn test_turn_error_is_printed_and_loop_continues() {
    let tmp = TempDir::new().unwrap();
    let (mut session, _chat) = session_with(
        &tmp,
        vec![
            reply(GREETING),
            Step::Fail(BuddyError::provider("scripted", "connection refused")),
            reply("Azul dure environ 45 minutes."),
        ],
    )
    .await;
    let mut lines = ScriptedLines::new(["Catan ?", "Durée d'Azul ?", "EXIT"]);

    let end = session.run(&mut lines).await.unwrap();
    assert_eq!(end, SessionEnd::ExitCommand);

    let out = output(&session);
    assert!(out.contains("Erreur : scripted: connection refused"));
    assert!(out.contains("Buddy : Azul dure environ 45 minutes."));
    // Greeting and the successful turn only.
    assert_eq!(session.context().len(), 4);
}

#[tokio::test]
async fn test_multiline_provider_error_prints_on_one_line() {
    let tmp = TempDir::new().unwrap();
    let body = "API error 401 Unauthorized: {\n    \"error\": {\n        \"message\": \"Incorrect API key\"\n    }\n}";
    let (mut session, _chat) = session_with(
        &tmp,
        vec![reply(GREETING), Step::Fail(BuddyError::provider("openai", body))],
    )
    .await;
    let mut lines = ScriptedLines::new(["Catan ?", "EXIT"]);

    session.run(&mut lines).await.unwrap();

    let out = output(&session);
    let errors: Vec<&str> = out.lines().filter(|l| l.starts_with("Erreur : ")).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0],
        "Erreur : openai: API error 401 Unauthorized: \
         { \"error\": { \"message\": \"Incorrect API key\" } }"
    );
    assert!(!out.contains("\n    \""));
}

#[tokio::test]
async fn test_greeting_failure_does_not_end_session() {
    let tmp = TempDir::new().unwrap();
    let (mut session, _chat) = session_with(
        &tmp,
        vec![Step::Fail(BuddyError::ProviderTimeout {
            provider: "scripted".into(),
            secs: 120,
        })],
    )
    .await;
    let mut lines = ScriptedLines::new(["exit"]);

    let end = session.run(&mut lines).await.unwrap();
    assert_eq!(end, SessionEnd::ExitCommand);
    assert!(output(&session).contains("Erreur : scripted did not answer within 120s"));
}

#[tokio::test]
async fn test_interrupt_mid_turn_still_tears_down_index() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("storage");
    let (mut session, _chat) = session_with(&tmp, vec![reply(GREETING), Step::Hang]).await;
    assert!(dir.exists());

    let guard = TeardownGuard::new(&dir, true);
    let mut lines = ScriptedLines::new(["Combien de joueurs pour Catan ?"]);

    tokio::select! {
        _ = session.run(&mut lines) => panic!("the turn should still be in flight"),
        _ = tokio::time::sleep(Duration::from_millis(100)) => {}
    }

    assert_eq!(session.context().len(), 2, "interrupted turn is not recorded");
    drop(guard);
    assert!(!dir.exists());
}

#[tokio::test]
async fn test_kept_index_survives_session() {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join("storage");
    let (mut session, _chat) = session_with(&tmp, vec![reply(GREETING)]).await;

    let guard = TeardownGuard::new(&dir, false);
    session
        .run(&mut ScriptedLines::new(["EXIT"]))
        .await
        .unwrap();
    assert!(!guard.teardown().unwrap());
    assert!(dir.exists());
}
