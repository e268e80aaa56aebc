// tests/enrich_bulk.rs
//
// Bulk extraction over parsed exports, the timeline summary and the
// local-LLM client against an in-process completions endpoint.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;

use axum::{routing::post, Json, Router};
use serde_json::{json, Value};

use telegram_monitor::enrich::summary::DosingSummary;
use telegram_monitor::enrich::{
    analyze_chats, DisabledExtractor, DosingInfo, Extractor, LocalLlmExtractor,
};
use telegram_monitor::export;

/// Marks any text mentioning "mg" as a dose of the word before it.
struct KeywordExtractor;

impl Extractor for KeywordExtractor {
    fn extract<'a>(
        &'a self,
        text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Option<DosingInfo>> + Send + 'a>> {
        Box::pin(async move {
            let words: Vec<&str> = text.split_whitespace().collect();
            let pos = words.iter().position(|w| w.ends_with("mg"));
            Some(match pos {
                Some(i) => DosingInfo {
                    medication: words.get(i + 1).map(|s| s.to_string()),
                    dosage: Some(words[i].to_string()),
                    frequency: None,
                    side_effects: if text.contains("dizzy") {
                        vec!["dizziness".into()]
                    } else {
                        Vec::new()
                    },
                    is_dosing_related: true,
                },
                None => DosingInfo::default(),
            })
        })
    }
    fn name(&self) -> &'static str {
        "keyword"
    }
}

fn export_with(texts: &[(&str, &str)]) -> String {
    let messages: Vec<Value> = texts
        .iter()
        .enumerate()
        .map(|(i, (date, text))| {
            json!({"id": i + 1, "type": "message", "date": date, "from": "Ann", "text": text})
        })
        .collect();
    json!({"name": "Ward", "messages": messages}).to_string()
}

#[tokio::test]
async fn only_dosing_related_rows_become_events() {
    let chats = export::parse_str(&export_with(&[
        ("2024-03-02T08:00:00", "Took 100mg sertraline bit dizzy"),
        ("2024-03-01T08:00:00", "Took 50mg sertraline"),
        ("2024-03-01T12:00:00", "lunch was fine"),
        ("2024-03-01T13:00:00", ""),
    ]))
    .unwrap();

    let events = analyze_chats(&KeywordExtractor, &chats, |_, _| {}).await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].sender, "Ann");
    assert_eq!(events[0].info.dosage.as_deref(), Some("100mg"));

    let summary = DosingSummary::from_events(&events);
    let labels: Vec<&str> = summary.medications.iter().map(|e| e.label.as_str()).collect();
    assert_eq!(labels, vec!["sertraline 50mg", "sertraline 100mg"], "sorted by date");
    assert_eq!(summary.side_effects.len(), 1);
    assert_eq!(summary.side_effects[0].label, "dizziness");
}

#[tokio::test]
async fn progress_fires_every_tenth_row() {
    let texts: Vec<(String, String)> = (0..12)
        .map(|i| (format!("2024-03-01T{:02}:00:00", i), format!("note {i}")))
        .collect();
    let refs: Vec<(&str, &str)> = texts.iter().map(|(d, t)| (d.as_str(), t.as_str())).collect();
    let chats = export::parse_str(&export_with(&refs)).unwrap();

    let mut seen = Vec::new();
    let events = analyze_chats(&KeywordExtractor, &chats, |done, total| seen.push((done, total))).await;
    assert!(events.is_empty());
    assert_eq!(seen, vec![(1, 12), (11, 12)]);
}

#[tokio::test]
async fn disabled_extractor_yields_nothing() {
    let chats = export::parse_str(&export_with(&[("2024-03-01T08:00:00", "Took 50mg x")])).unwrap();
    let events = analyze_chats(&DisabledExtractor, &chats, |_, _| {}).await;
    assert!(events.is_empty());
    assert!(DosingSummary::from_events(&events).is_empty());
}

async fn serve_completions(content: &'static str) -> SocketAddr {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(move |Json(req): Json<Value>| async move {
            assert_eq!(req["response_format"]["type"], "json_object");
            assert_eq!(req["messages"][0]["role"], "system");
            Json(json!({
                "choices": [{"message": {"role": "assistant", "content": content}}]
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn local_llm_answer_is_decoded() {
    let addr = serve_completions(
        "```json\n{\"medication\":\"sertraline\",\"dosage\":\"50mg\",\"frequency\":\"daily\",\"side_effects\":[\"nausea\"],\"is_dosing_related\":true}\n```",
    )
    .await;
    let x = LocalLlmExtractor::new(&format!("http://{addr}/v1/")).unwrap();
    let info = x.extract("Took 50mg sertraline").await.expect("parsed");
    assert_eq!(info.medication.as_deref(), Some("sertraline"));
    assert_eq!(info.frequency.as_deref(), Some("daily"));
    assert_eq!(info.side_effects, vec!["nausea".to_string()]);
}

#[tokio::test]
async fn local_llm_garbage_and_outage_yield_none() {
    let addr = serve_completions("I think they took some pills").await;
    let x = LocalLlmExtractor::new(&format!("http://{addr}/v1")).unwrap();
    assert_eq!(x.extract("anything").await, None);

    let down = LocalLlmExtractor::new("http://127.0.0.1:9/v1").unwrap();
    assert_eq!(down.extract("anything").await, None);
}
