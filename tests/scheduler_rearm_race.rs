use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{EncodingKey, Header};
use tokengate::refresh::{RefreshScheduler, SystemClock};
use tokengate::token::MemoryTokenStore;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{Registry, fmt};

#[derive(serde::Serialize)]
struct TestClaims {
    exp: u64,
}

fn mint_token(ttl: Duration) -> String {
    let exp = (SystemTime::now() + ttl)
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    jsonwebtoken::encode(
        &Header::default(),
        &TestClaims { exp },
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

struct VecWriter {
    lines: Arc<Mutex<Vec<String>>>,
}

impl std::io::Write for VecWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.lines.lock().unwrap();
        guard.push(String::from_utf8_lossy(buf).into_owned());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_schedules_leave_one_live_timer_that_fires_once() {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let writer_lines = lines.clone();
    let subscriber = Registry::default().with(
        fmt::Layer::default()
            .with_writer(move || VecWriter {
                lines: writer_lines.clone(),
            })
            .with_target(false)
            .with_level(true)
            .with_ansi(false),
    );
    // Timer tasks land on arbitrary worker threads; a thread-local default
    // subscriber would miss their events.
    tracing::subscriber::set_global_default(subscriber).unwrap();

    // 11s of life against a 10s margin: every armed timer fires ~1s out.
    let store = Arc::new(MemoryTokenStore::new(Some(mint_token(
        Duration::from_secs(11),
    ))));
    let scheduler = Arc::new(RefreshScheduler::new(
        store,
        Arc::new(SystemClock),
        Duration::from_secs(10),
    ));

    // Rearms racing from several threads at once, as when the coordinator's
    // success-path rearm overlaps a login's begin_session.
    let mut rearms = Vec::new();
    for _ in 0..16 {
        let scheduler = scheduler.clone();
        rearms.push(tokio::spawn(async move {
            scheduler.schedule();
        }));
    }
    for rearm in rearms {
        rearm.await.unwrap();
    }
    assert!(scheduler.is_armed());

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let fires = lines
        .lock()
        .unwrap()
        .iter()
        .filter(|line| line.contains("scheduler.fire"))
        .count();
    assert_eq!(
        fires, 1,
        "a rearm must abort the timer it replaces; a leaked timer fires too"
    );
}
