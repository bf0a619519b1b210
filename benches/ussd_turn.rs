use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use reqwest::Client;
use siren::flow::{self, MenuState};
use siren::session::Session;
use siren::store::MemoryIncidentStore;
use siren::{app, build_state, AppConfig};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

fn bench_scenarios(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    // One Siren instance bound to a random port, shared by the HTTP cases.
    let base_url = rt.block_on(async {
        let state = build_state(AppConfig::default(), Arc::new(MemoryIncidentStore::new()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = app(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/ussd", addr)
    });
    let client = Client::new();

    // Full seven-turn report dialog over HTTP, fresh session id per iteration
    // so no turn is ever served from the replay cache.
    c.bench_function("http_full_report_dialog", |b| {
        b.iter_custom(|iters| {
            use std::time::Instant;
            let start = Instant::now();
            for i in 0..iters {
                rt.block_on(async {
                    let session_id = format!("bench-{}", i);
                    for text in ["", "1", "2", "Lagos", "3", "phone lost", "1"] {
                        let resp = client
                            .post(&base_url)
                            .form(&[
                                ("sessionId", session_id.as_str()),
                                ("phoneNumber", "0700123456"),
                                ("text", text),
                            ])
                            .send()
                            .await
                            .unwrap();
                        black_box(resp.status());
                    }
                });
            }
            start.elapsed()
        })
    });

    // State machine alone, no HTTP: one main-menu turn.
    let store = MemoryIncidentStore::new();
    c.bench_function("flow_menu_turn", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut session = Session::new("bench".into(), "0700123456".into());
                session.state = MenuState::MainMenu;
                let out = flow::advance(&mut session, "1", &store).await.unwrap();
                black_box(out);
            })
        })
    });
}

criterion_group!(ussd_turn_group, bench_scenarios);
criterion_main!(ussd_turn_group);
