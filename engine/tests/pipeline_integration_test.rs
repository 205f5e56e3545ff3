//! Streaming pipeline: terminal actions, ownership and artifacts

mod common;

use appforge_engine::llm::MessageRole;
use appforge_engine::pipeline::{StreamOutcome, FAILURE_PREFIX};
use common::{routed, ScriptedProvider, Step, TestEngineBuilder};
use futures::StreamExt;
use sdk::errors::EngineError;
use sdk::types::{AppId, Strategy, TurnRole, UserId};

const OWNER: UserId = UserId(7);

#[tokio::test]
async fn test_completed_stream_appends_one_reply_and_writes_artifacts() {
    let chat = ScriptedProvider::answering("Here you go:\n```html\n<h1>Todo</h1>\n```\n");
    let te = TestEngineBuilder::new().chat(chat.clone()).build().await;
    let app = te.engine.apps().create_app(OWNER, "a todo list page").await.unwrap();

    let mut stream = te
        .engine
        .pipeline()
        .execute(app.id, "make the title blue", OWNER)
        .await
        .unwrap();

    let mut fragments = Vec::new();
    while let Some(fragment) = stream.next().await {
        fragments.push(fragment.unwrap());
    }
    let text = fragments.concat();
    assert!(fragments.len() > 1, "reply should arrive in several fragments");
    assert_eq!(text, "Here you go:\n```html\n<h1>Todo</h1>\n```\n");
    assert_eq!(
        stream.outcome().await,
        StreamOutcome::Completed {
            chars: text.chars().count()
        }
    );

    let turns = te.engine.apps().list_history(app.id, OWNER, 50, None).await.unwrap();
    assert_eq!(turns.len(), 2);
    // Newest first
    assert_eq!(turns[0].role, TurnRole::Assistant);
    assert_eq!(turns[0].message, text);
    assert_eq!(turns[1].role, TurnRole::User);
    assert_eq!(turns[1].message, "make the title blue");

    let index = te
        .engine
        .config()
        .storage
        .code_output_dir
        .join(Strategy::SingleDocument.artifact_dir_name(app.id))
        .join("index.html");
    assert_eq!(std::fs::read_to_string(index).unwrap(), "<h1>Todo</h1>");
}

#[tokio::test]
async fn test_multi_file_reply_writes_three_files() {
    let reply = "```html\n<div id=app></div>\n```\n```css\n#app { color: red }\n```\n```js\nconsole.log(1)\n```\n";
    let te = TestEngineBuilder::new()
        .routing(routed("multi_file"))
        .chat(ScriptedProvider::answering(reply))
        .build()
        .await;
    let app = te.engine.apps().create_app(OWNER, "landing page").await.unwrap();
    assert_eq!(app.strategy, Strategy::MultiFile);

    let text = te
        .engine
        .pipeline()
        .execute(app.id, "build it", OWNER)
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap();
    assert_eq!(text, reply);

    let dir = te
        .engine
        .config()
        .storage
        .code_output_dir
        .join(Strategy::MultiFile.artifact_dir_name(app.id));
    assert_eq!(std::fs::read_to_string(dir.join("style.css")).unwrap(), "#app { color: red }");
    assert_eq!(std::fs::read_to_string(dir.join("script.js")).unwrap(), "console.log(1)");
    assert!(dir.join("index.html").is_file());
}

#[tokio::test]
async fn test_failure_appends_exactly_one_failure_turn() {
    let chat = ScriptedProvider::new(vec![Step::FailAfter(
        "```html\n<h1>".to_string(),
        "connection reset".to_string(),
    )]);
    let te = TestEngineBuilder::new().chat(chat).build().await;
    let app = te.engine.apps().create_app(OWNER, "a clock").await.unwrap();

    let mut stream = te.engine.pipeline().execute(app.id, "go", OWNER).await.unwrap();

    let mut text = String::new();
    let mut error = None;
    while let Some(fragment) = stream.next().await {
        match fragment {
            Ok(f) => text.push_str(&f),
            Err(e) => error = Some(e),
        }
    }
    assert_eq!(text, "```html\n<h1>");
    assert!(matches!(error, Some(EngineError::Generation(ref m)) if m.contains("connection reset")));
    assert_eq!(stream.outcome().await, StreamOutcome::Failed);

    let turns = te.engine.apps().list_history(app.id, OWNER, 50, None).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, TurnRole::Assistant);
    assert!(turns[0].message.starts_with(FAILURE_PREFIX));
    assert!(turns[0].message.contains("connection reset"));

    let dir = te
        .engine
        .config()
        .storage
        .code_output_dir
        .join(Strategy::SingleDocument.artifact_dir_name(app.id));
    assert!(!dir.join("index.html").exists());
}

#[tokio::test]
async fn test_failed_turn_leaves_live_memory_equal_to_rehydrated() {
    let chat = ScriptedProvider::new(vec![
        Step::Fail("upstream overloaded".to_string()),
        Step::Answer("```html\n<h1>ok</h1>\n```".to_string()),
    ]);
    let te = TestEngineBuilder::new().chat(chat.clone()).build().await;
    let app = te.engine.apps().create_app(OWNER, "a clock").await.unwrap();

    let stream = te.engine.pipeline().execute(app.id, "first", OWNER).await.unwrap();
    assert_eq!(stream.outcome().await, StreamOutcome::Failed);

    let live = te
        .engine
        .sessions()
        .get(app.id, Strategy::SingleDocument)
        .await
        .unwrap()
        .memory_snapshot();
    let last = live.last().unwrap();
    assert_eq!(last.role, MessageRole::Assistant);
    assert!(last.content.starts_with(FAILURE_PREFIX));

    te.engine.sessions().evict(app.id, Strategy::SingleDocument);
    let rehydrated = te
        .engine
        .sessions()
        .get(app.id, Strategy::SingleDocument)
        .await
        .unwrap()
        .memory_snapshot();
    assert_eq!(live, rehydrated);

    te.engine
        .pipeline()
        .execute(app.id, "second", OWNER)
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap();
    let request = chat.requests().pop().unwrap();
    let roles: Vec<_> = request.iter().skip(1).map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![MessageRole::User, MessageRole::Assistant, MessageRole::User]
    );
}

#[tokio::test]
async fn test_rejected_request_is_a_failure_turn() {
    let chat = ScriptedProvider::new(vec![Step::Fail("model overloaded".to_string())]);
    let te = TestEngineBuilder::new().chat(chat).build().await;
    let app = te.engine.apps().create_app(OWNER, "a clock").await.unwrap();

    let result = te
        .engine
        .pipeline()
        .execute(app.id, "go", OWNER)
        .await
        .unwrap()
        .collect_text()
        .await;
    assert!(matches!(result, Err(EngineError::Generation(_))));

    let turns = te.engine.apps().list_history(app.id, OWNER, 50, None).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert!(turns[0].message.starts_with(FAILURE_PREFIX));
}

#[tokio::test]
async fn test_cancelled_stream_appends_nothing() {
    let chat = ScriptedProvider::new(vec![Step::Hang("```html\n".to_string())]);
    let te = TestEngineBuilder::new().chat(chat).build().await;
    let app = te.engine.apps().create_app(OWNER, "a clock").await.unwrap();

    let mut stream = te.engine.pipeline().execute(app.id, "go", OWNER).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "```html\n");

    let outcome = stream.cancel().await.unwrap();
    assert_eq!(outcome, StreamOutcome::Cancelled);

    let turns = te.engine.apps().list_history(app.id, OWNER, 50, None).await.unwrap();
    assert_eq!(turns.len(), 1, "only the user turn is kept");
    assert_eq!(turns[0].role, TurnRole::User);
}

#[tokio::test]
async fn test_non_owner_is_refused_before_any_side_effect() {
    let te = TestEngineBuilder::new().build().await;
    let app = te.engine.apps().create_app(OWNER, "a clock").await.unwrap();

    let result = te.engine.pipeline().execute(app.id, "go", UserId(8)).await;
    assert!(matches!(result, Err(EngineError::Forbidden(_))));
    assert_eq!(te.chat.calls(), 0);
    assert!(!te.engine.sessions().contains(app.id, Strategy::SingleDocument));

    let turns = te.engine.apps().list_history(app.id, OWNER, 50, None).await.unwrap();
    assert!(turns.is_empty());
}

#[tokio::test]
async fn test_invalid_requests() {
    let te = TestEngineBuilder::new().build().await;
    let app = te.engine.apps().create_app(OWNER, "a clock").await.unwrap();
    let pipeline = te.engine.pipeline();

    assert!(matches!(
        pipeline.execute(app.id, "   ", OWNER).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        pipeline.execute(AppId(0), "go", OWNER).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        pipeline.execute(AppId(9999), "go", OWNER).await,
        Err(EngineError::NotFound(_))
    ));
    assert_eq!(te.chat.calls(), 0);
}

#[tokio::test]
async fn test_second_turn_sees_first_exchange() {
    let chat = ScriptedProvider::new(vec![
        Step::Answer("<h1>v1</h1>".to_string()),
        Step::Answer("<h1>v2</h1>".to_string()),
    ]);
    let te = TestEngineBuilder::new().chat(chat.clone()).build().await;
    let app = te.engine.apps().create_app(OWNER, "a clock").await.unwrap();
    let pipeline = te.engine.pipeline();

    pipeline.execute(app.id, "first", OWNER).await.unwrap().collect_text().await.unwrap();
    pipeline.execute(app.id, "second", OWNER).await.unwrap().collect_text().await.unwrap();

    let requests = chat.requests();
    assert_eq!(requests.len(), 2);
    let second: Vec<(MessageRole, &str)> = requests[1]
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(second[0].0, MessageRole::System);
    assert_eq!(
        &second[1..],
        &[
            (MessageRole::User, "first"),
            (MessageRole::Assistant, "<h1>v1</h1>"),
            (MessageRole::User, "second"),
        ]
    );
    assert_eq!(te.engine.sessions().constructions(), 1);
}

#[tokio::test]
async fn test_tool_built_project_streams_tool_notices() {
    let reasoning = ScriptedProvider::new(vec![
        Step::Tool(
            "write_file".to_string(),
            r#"{"path": "package.json", "content": "{\"scripts\": {\"build\": \"vite build\"}}"}"#
                .to_string(),
        ),
        Step::Tool(
            "write_file".to_string(),
            r#"{"path": "src/App.vue", "content": "<template><h1>Shop</h1></template>"}"#
                .to_string(),
        ),
        Step::Answer("The shop is ready.".to_string()),
    ]);
    let te = TestEngineBuilder::new()
        .routing(routed("vue_project"))
        .reasoning(reasoning.clone())
        .build()
        .await;
    let app = te.engine.apps().create_app(OWNER, "an online shop").await.unwrap();
    assert_eq!(app.strategy, Strategy::ToolBuiltProject);

    let text = te
        .engine
        .pipeline()
        .execute(app.id, "build the shop", OWNER)
        .await
        .unwrap()
        .collect_text()
        .await
        .unwrap();

    assert_eq!(
        text,
        "[tool] write_file package.json\n[tool] write_file src/App.vue\nThe shop is ready."
    );
    assert_eq!(reasoning.calls(), 3);
    assert_eq!(te.chat.calls(), 0);

    let dir = te
        .engine
        .config()
        .storage
        .code_output_dir
        .join(Strategy::ToolBuiltProject.artifact_dir_name(app.id));
    assert_eq!(
        std::fs::read_to_string(dir.join("src/App.vue")).unwrap(),
        "<template><h1>Shop</h1></template>"
    );

    let turns = te.engine.apps().list_history(app.id, OWNER, 50, None).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].message, text);
}
