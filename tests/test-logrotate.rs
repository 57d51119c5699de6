use std::sync::Arc;
use std::time::Duration;
use tailcast::{Hub, TailDetector};
use tempfile::tempdir;
use tokio::time;

const TIMEOUT_2_SEC: Duration = Duration::from_millis(2000);

#[tokio::test]
pub async fn test_logrotate() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("app.log");
    std::fs::write(&logfile, "before rotation\n").unwrap();

    let hub = Hub::new(16);
    let detector = TailDetector::new(&logfile);

    // Initial contents are picked up by the first cycle.
    let batch = detector.check_for_new_content().await;
    assert_eq!(batch.lines(), &["before rotation".to_string()]);

    let mut viewer = hub.subscribe();

    std::fs::remove_file(&logfile).unwrap();
    let rotated = logdir.path().join("app-2.log");
    std::fs::write(&rotated, "foo\nbar\nbaz\n").unwrap();

    let batch = detector.check_for_new_content().await;
    assert_eq!(batch.source(), rotated.as_path());
    assert_eq!(detector.cursor().await, 12);
    assert_eq!(hub.publish(&batch).await, 0);

    let mut line_vals = Vec::new();
    for _ in 0..3 {
        let line = time::timeout(TIMEOUT_2_SEC, viewer.recv())
            .await
            .unwrap()
            .unwrap();
        line_vals.push(line);
    }
    assert_eq!(line_vals, vec!["foo", "bar", "baz"]);

    // Appends to the rotated-in file keep flowing.
    std::fs::write(&rotated, "foo\nbar\nbaz\nqux\n").unwrap();
    let batch = detector.check_for_new_content().await;
    assert_eq!(batch.lines(), &["qux".to_string()]);
}

#[tokio::test]
pub async fn test_logrotate_while_running() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("app.log");
    std::fs::write(&logfile, "").unwrap();

    let hub = Hub::new(16);
    let mut viewer = hub.subscribe();

    let detector = Arc::new(TailDetector::new(&logfile));
    let tail = Arc::clone(&detector);
    let tail_hub = hub.clone();
    let runner = tokio::spawn(async move {
        tail.run(&tail_hub, Duration::from_millis(20), None).await
    });

    std::fs::write(&logfile, "one\n").unwrap();
    let line = time::timeout(TIMEOUT_2_SEC, viewer.recv()).await.unwrap();
    assert_eq!(line.as_deref(), Some("one"));

    std::fs::remove_file(&logfile).unwrap();
    std::fs::write(logdir.path().join("app-2.log"), "two\nthree\n").unwrap();

    let line = time::timeout(TIMEOUT_2_SEC, viewer.recv()).await.unwrap();
    assert_eq!(line.as_deref(), Some("two"));
    let line = time::timeout(TIMEOUT_2_SEC, viewer.recv()).await.unwrap();
    assert_eq!(line.as_deref(), Some("three"));

    assert_eq!(detector.path().await, logdir.path().join("app-2.log"));
    runner.abort();
}
