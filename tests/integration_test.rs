#![cfg(unix)]

use futures::StreamExt;
use shellpool::{
    Lifecycle, LifecycleError, ProcessState, Scheduler, SchedulerConfig, SchedulerError,
    StreamSelector,
};
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

const SLEEP_DELAY: f64 = 0.1;

fn sleep_for(seconds: f64) -> String {
    format!("sleep {}", seconds)
}

fn exit_with(code: i32) -> String {
    format!("exit {}", code)
}

fn print_stdout(message: &str) -> String {
    format!("echo {}", message)
}

fn print_stderr(message: &str) -> String {
    format!("echo {} >&2", message)
}

fn started(config: SchedulerConfig) -> Scheduler {
    let scheduler = Scheduler::new(config).unwrap();
    assert_ok!(scheduler.start());
    scheduler
}

async fn collect_lines(scheduler: &Scheduler, cmds: &[String], selector: StreamSelector) -> Vec<String> {
    scheduler.iter_lines(cmds, selector).unwrap().collect().await
}

#[tokio::test]
async fn test_basic_init() {
    let config = SchedulerConfig::new()
        .with_max_concurrency(1)
        .with_poll_interval(Duration::from_secs(1));
    let scheduler = started(config);

    assert_eq!(scheduler.max_concurrency(), 1);
    assert_eq!(scheduler.poll_interval(), Some(Duration::from_secs(1)));
    assert!(scheduler.running_handles().is_empty());
    assert!(scheduler.pending_handles().is_empty());

    assert_ok!(scheduler.stop().await);
}

#[tokio::test]
async fn test_double_start() {
    let scheduler = started(SchedulerConfig::default());
    let err = assert_err!(scheduler.start());
    assert!(matches!(
        err,
        SchedulerError::Lifecycle(LifecycleError::AlreadyStarted)
    ));
    assert_ok!(scheduler.stop().await);
}

#[tokio::test]
async fn test_stop_not_started() {
    let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
    assert!(assert_err!(scheduler.stop().await).is_lifecycle());

    let scheduler = started(SchedulerConfig::default());
    assert_ok!(scheduler.stop().await);
    let err = assert_err!(scheduler.stop().await);
    assert!(matches!(
        err,
        SchedulerError::Lifecycle(LifecycleError::NotStarted)
    ));
}

#[tokio::test]
async fn test_spawn_from_non_started() {
    let scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
    assert!(assert_err!(scheduler.spawn(["anything"])).is_lifecycle());
    assert!(assert_err!(scheduler.gather(["anything"]).await).is_lifecycle());
    assert!(scheduler.pending_handles().is_empty());
}

#[tokio::test]
async fn test_subprocess_tracking() {
    let s = started(SchedulerConfig::new().with_max_concurrency(2));

    let pair = s
        .spawn([sleep_for(2.0 * SLEEP_DELAY), sleep_for(2.0 * SLEEP_DELAY)])
        .unwrap();
    let (one, two) = (&pair[0], &pair[1]);
    let three = s.spawn([sleep_for(5.0 * SLEEP_DELAY)]).unwrap().remove(0);

    tokio::join!(one.wait_running(), two.wait_running());
    assert!(s.running_handles().contains(one));
    assert!(s.running_handles().contains(two));
    assert!(!s.running_handles().contains(&three));
    assert!(s.pending_handles().contains(&three));
    assert_eq!(three.state(), ProcessState::Pending);

    tokio::join!(one.wait_done(), two.wait_done(), three.wait_running());
    assert!(!s.running_handles().contains(one));
    assert!(!s.running_handles().contains(two));
    assert!(s.running_handles().contains(&three));
    assert!(three.is_running());

    three.wait_done().await;
    assert!(s.running_handles().is_empty());
    assert!(s.pending_handles().is_empty());
    assert_eq!(one.exit_code(), Some(0));
    assert_eq!(two.exit_code(), Some(0));
    assert_eq!(three.exit_code(), Some(0));
    assert!(three.began_at().unwrap() >= three.scheduled_at());

    assert_ok!(s.stop().await);
}

#[tokio::test]
async fn test_running_never_exceeds_cap() {
    let cap = 2;
    let s = started(SchedulerConfig::new().with_max_concurrency(cap));
    let handles = s.spawn((0..6).map(|_| sleep_for(SLEEP_DELAY))).unwrap();

    let mut max_seen = 0;
    while handles.iter().any(|handle| !handle.is_done()) {
        let running = s.running_handles().len();
        assert!(running <= cap, "{} running with cap {}", running, cap);
        max_seen = max_seen.max(running);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(max_seen, cap);
    assert_ok!(s.stop().await);
}

#[tokio::test]
async fn test_concurrency_limiting() {
    let mut times = Vec::new();
    for scalar in [1, 2, 4] {
        let start = Instant::now();
        let s = started(SchedulerConfig::new().with_max_concurrency(scalar));
        let cmds: Vec<String> = (0..8).map(|_| sleep_for(SLEEP_DELAY)).collect();
        assert_ok!(s.gather(&cmds).await);
        assert_ok!(s.stop().await);
        times.push(start.elapsed());
    }

    assert!(times[0] > times[1], "{:?}", times);
    assert!(times[1] > times[2], "{:?}", times);
}

#[tokio::test]
async fn test_stop_with_running_subprocesses() {
    let s = started(SchedulerConfig::new().with_max_concurrency(1));
    let handles = s
        .spawn([sleep_for(3.0 * SLEEP_DELAY), sleep_for(SLEEP_DELAY)])
        .unwrap();
    handles[0].wait_running().await;

    assert_ok!(s.stop().await);

    assert!(s.running_handles().is_empty());
    assert!(s.pending_handles().is_empty());
    assert!(handles.iter().all(|handle| handle.is_done()));
}

#[tokio::test]
async fn test_start_while_stopping() {
    let s = started(SchedulerConfig::default());
    let handle = s.spawn([sleep_for(3.0 * SLEEP_DELAY)]).unwrap().remove(0);

    let stopping = tokio::spawn({
        let s = s.clone();
        async move { s.stop().await }
    });
    while s.lifecycle() != Lifecycle::Stopped {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let err = assert_err!(s.start());
    assert!(matches!(
        err,
        SchedulerError::Lifecycle(LifecycleError::StillStopping)
    ));
    assert!(!handle.is_done());

    assert_ok!(stopping.await.unwrap());
    assert!(handle.is_done());
    assert_ok!(s.start());
    assert_ok!(s.stop().await);
}

#[tokio::test]
async fn test_spawn_after_stop_is_rejected() {
    let s = started(SchedulerConfig::default());
    assert_ok!(s.stop().await);
    assert!(assert_err!(s.spawn(["true"])).is_lifecycle());
}

#[tokio::test]
async fn test_iter_lines() {
    let cmds = vec![
        print_stdout("A"),
        print_stdout("B"),
        print_stderr("C"),
        print_stderr("D"),
    ];
    let s = started(SchedulerConfig::default());

    let stdout_lines = collect_lines(&s, &cmds, StreamSelector::Stdout).await;
    assert!(stdout_lines.contains(&"A".to_string()));
    assert!(stdout_lines.contains(&"B".to_string()));
    assert_eq!(stdout_lines.len(), 2);

    let stderr_lines = collect_lines(&s, &cmds, StreamSelector::Stderr).await;
    assert!(stderr_lines.contains(&"C".to_string()));
    assert!(stderr_lines.contains(&"D".to_string()));
    assert_eq!(stderr_lines.len(), 2);

    let mut lines = collect_lines(&s, &cmds, StreamSelector::default()).await;
    lines.sort();
    assert_eq!(lines, vec!["A", "B", "C", "D"]);

    assert_ok!(s.stop().await);
}

#[tokio::test]
async fn test_iter_lines_drains_unselected_stream() {
    let s = started(SchedulerConfig::default());
    let cmds = [
        "echo hi; head -c 200000 /dev/zero >&2; echo bye".to_string(),
        "echo oops >&2; head -c 200000 /dev/zero; echo done >&2".to_string(),
    ];

    let mut stdout_lines = tokio::time::timeout(
        Duration::from_secs(5),
        collect_lines(&s, &cmds[..1], StreamSelector::Stdout),
    )
    .await
    .unwrap();
    stdout_lines.sort();
    assert_eq!(stdout_lines, vec!["bye", "hi"]);

    let mut stderr_lines = tokio::time::timeout(
        Duration::from_secs(5),
        collect_lines(&s, &cmds[1..], StreamSelector::Stderr),
    )
    .await
    .unwrap();
    stderr_lines.sort();
    assert_eq!(stderr_lines, vec!["done", "oops"]);

    assert_ok!(tokio::time::timeout(Duration::from_secs(5), s.stop()).await.unwrap());
}

#[tokio::test]
async fn test_line_helpers_preserve_per_process_order() {
    let s = started(SchedulerConfig::default());

    let lines: Vec<String> = s
        .stdout_lines(["printf '1\\n2\\n3\\n'", "printf 'x\\ny\\n'; echo hidden >&2"])
        .unwrap()
        .collect()
        .await;
    let digits: Vec<_> = lines.iter().filter(|l| l.parse::<u32>().is_ok()).collect();
    let letters: Vec<_> = lines.iter().filter(|l| l.parse::<u32>().is_err()).collect();
    assert_eq!(digits, vec!["1", "2", "3"]);
    assert_eq!(letters, vec!["x", "y"]);

    let errors: Vec<String> = s.stderr_lines(["echo oops >&2"]).unwrap().collect().await;
    assert_eq!(errors, vec!["oops"]);

    assert_ok!(s.stop().await);
}

#[tokio::test]
async fn test_invalid_stream_selector() {
    let err = assert_err!("everything".parse::<StreamSelector>());
    assert!(matches!(err, SchedulerError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_gather() {
    let s = started(SchedulerConfig::default());
    let exit_codes = s
        .gather([exit_with(0), exit_with(1), exit_with(2), exit_with(3), exit_with(4)])
        .await
        .unwrap();
    assert_eq!(exit_codes, vec![0, 1, 2, 3, 4]);
    assert_ok!(s.stop().await);
}

#[tokio::test]
async fn test_gather_ignores_completion_order() {
    let s = started(SchedulerConfig::default());
    let exit_codes = s
        .gather([
            format!("sleep {}; exit 0", 3.0 * SLEEP_DELAY),
            format!("sleep {}; exit 1", SLEEP_DELAY),
            exit_with(2),
        ])
        .await
        .unwrap();
    assert_eq!(exit_codes, vec![0, 1, 2]);
    assert_ok!(s.stop().await);
}

#[tokio::test]
async fn test_gather_with_large_output() {
    let s = started(SchedulerConfig::new().with_max_concurrency(2));
    let noisy = "head -c 300000 /dev/zero; head -c 300000 /dev/zero >&2".to_string();
    let codes = s.gather([noisy.clone(), noisy]).await.unwrap();
    assert_eq!(codes, vec![0, 0]);
    assert_ok!(s.stop().await);
}

#[tokio::test]
async fn test_gather_polling() {
    let config = SchedulerConfig::new()
        .with_max_concurrency(2)
        .with_poll_interval(Duration::from_millis(10));
    let s = started(config);

    let codes = s
        .gather([exit_with(3), sleep_for(SLEEP_DELAY), exit_with(5)])
        .await
        .unwrap();
    assert_eq!(codes, vec![3, 0, 5]);

    assert_ok!(s.stop().await);
    assert!(s.running_handles().is_empty());
}

#[tokio::test]
async fn test_polling_tracks_cap() {
    let config = SchedulerConfig::new().with_max_concurrency(1).with_polling();
    let s = started(config);
    let handles = s.spawn([sleep_for(SLEEP_DELAY), exit_with(7)]).unwrap();

    handles[0].wait_running().await;
    assert!(handles[1].is_pending());
    assert_eq!(handles[1].wait_done().await, 7);
    assert!(handles[0].is_done());

    assert_ok!(s.stop().await);
}

#[tokio::test]
async fn test_identical_commands_are_distinct() {
    let s = started(SchedulerConfig::default());
    let handles = s.spawn(["true", "true"]).unwrap();
    assert_ne!(handles[0], handles[1]);
    assert_ne!(handles[0].id(), handles[1].id());
    s.block().await;
    assert!(handles.iter().all(|handle| handle.exit_code() == Some(0)));
    assert_ok!(s.stop().await);
}

#[tokio::test]
async fn test_block_waits_for_outstanding_work() {
    let s = started(SchedulerConfig::new().with_max_concurrency(1));
    s.block().await;

    let handles = s.spawn([sleep_for(SLEEP_DELAY), sleep_for(SLEEP_DELAY)]).unwrap();
    s.block().await;
    assert!(handles.iter().all(|handle| handle.is_done()));
    assert!(s.pending_handles().is_empty());
    assert!(s.running_handles().is_empty());

    assert_ok!(s.stop().await);
}

#[tokio::test]
async fn test_signal_exit_code() {
    let s = started(SchedulerConfig::default());
    let codes = s.gather(["kill -TERM $$"]).await.unwrap();
    assert_eq!(codes, vec![-15]);
    assert_ok!(s.stop().await);
}

#[tokio::test]
async fn test_scoped_stops_on_error() {
    let mut leaked = None;
    let result: Result<(), SchedulerError> = Scheduler::scoped(SchedulerConfig::default(), |s| {
        leaked = Some(s.clone());
        async move {
            s.spawn([sleep_for(SLEEP_DELAY)])?;
            Err::<(), _>(SchedulerError::InvalidArgument("bail out".to_string()))
        }
    })
    .await;

    assert!(matches!(result, Err(SchedulerError::InvalidArgument(_))));
    let s = leaked.unwrap();
    assert!(!s.is_started());
    assert!(s.running_handles().is_empty());
    assert!(s.pending_handles().is_empty());
}

#[tokio::test]
async fn test_handle_chunks_are_raw() {
    let s = started(SchedulerConfig::default());
    let handle = s.spawn(["printf 'a\\r\\nb'"]).unwrap().remove(0);

    let chunks: Vec<Vec<u8>> = handle
        .stdout_chunks()
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;
    assert_eq!(chunks, vec![b"a\r\n".to_vec(), b"b".to_vec()]);
    assert_eq!(handle.wait_done().await, 0);

    assert_ok!(s.stop().await);
}
