//! Integration tests for the log ring and live subscriber bus.

use media_crawler_core::logging::{LogEvent, LogHub};

fn msg_of(line: &str) -> String {
    let value: serde_json::Value = serde_json::from_str(line).unwrap();
    value["msg"].as_str().unwrap().to_string()
}

// ==================== Ring Tests ====================

#[test]
fn test_ring_keeps_newest_lines_in_emission_order() {
    let hub = LogHub::new(5);
    for i in 0..12 {
        hub.publish(&LogEvent::now("INFO", format!("line {i}")));
    }

    assert_eq!(hub.ring().len(), 5);
    let all: Vec<String> = hub.recent(0).iter().map(|l| msg_of(l)).collect();
    assert_eq!(all, ["line 7", "line 8", "line 9", "line 10", "line 11"]);

    let last_two: Vec<String> = hub.recent(2).iter().map(|l| msg_of(l)).collect();
    assert_eq!(last_two, ["line 10", "line 11"]);

    assert_eq!(hub.recent(100).len(), 5);
}

#[test]
fn test_lines_are_json_with_attrs() {
    let hub = LogHub::new(10);
    hub.publish(&LogEvent::now("WARN", "retrying").with_attr("attempt", 2));

    let lines = hub.recent(1);
    assert!(lines[0].ends_with('\n'));
    let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(value["level"], "WARN");
    assert_eq!(value["attrs"]["attempt"], 2);
    assert!(value["time"].as_str().unwrap().contains('T'));
}

// ==================== Bus Tests ====================

#[tokio::test]
async fn test_slow_subscriber_never_blocks_publisher() {
    let hub = LogHub::new(100);
    let (mut slow, _slow_sub) = hub.subscribe(2);
    let (mut fast, _fast_sub) = hub.subscribe(64);

    for i in 0..10 {
        hub.publish(&LogEvent::now("INFO", format!("event {i}")));
    }

    assert_eq!(hub.recent(0).len(), 10);
    assert_eq!(hub.bus().dropped(), 8);

    let mut delivered = Vec::new();
    while let Ok(line) = slow.try_recv() {
        delivered.push(msg_of(&line));
    }
    assert_eq!(delivered, ["event 0", "event 1"]);

    let mut fast_count = 0;
    while fast.try_recv().is_ok() {
        fast_count += 1;
    }
    assert_eq!(fast_count, 10);
}

#[tokio::test]
async fn test_dropping_subscription_closes_channel() {
    let hub = LogHub::new(10);
    let (mut lines, subscription) = hub.subscribe(4);
    assert_eq!(hub.bus().subscriber_count(), 1);

    drop(subscription);
    assert_eq!(hub.bus().subscriber_count(), 0);
    hub.publish(&LogEvent::now("INFO", "after unsubscribe"));
    assert!(lines.recv().await.is_none());
}
