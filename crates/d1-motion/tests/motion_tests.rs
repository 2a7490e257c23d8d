//! 回放与录制集成测试
//!
//! 用本地 UDP 套接字扮演 relay，向链路注入反馈并接收命令数据报。

use crossbeam_channel::Receiver;
use d1_link::{ArmLink, LinkConfig};
use d1_motion::{MotionError, MotionPlayer, MotionRecorder, PlayerEvent, PlayerStatus, RecorderEvent};
use d1_protocol::{FeedbackData, FeedbackFrame, NUM_JOINTS};
use d1_tools::{Motion, MotionKeyframe};
use serial_test::serial;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Harness {
    link: Arc<ArmLink>,
    relay: UdpSocket,
    feedback_tx: UdpSocket,
}

impl Harness {
    fn new(connection_timeout: Duration) -> Self {
        let relay = UdpSocket::bind("127.0.0.1:0").unwrap();
        relay.set_read_timeout(Some(Duration::from_millis(50))).unwrap();

        let config = LinkConfig {
            command_addr: relay.local_addr().unwrap(),
            feedback_bind: "127.0.0.1:0".parse().unwrap(),
            connection_timeout,
            connection_check_interval: Duration::from_millis(100),
            read_timeout: Duration::from_millis(20),
            ..LinkConfig::default()
        };
        let link = Arc::new(ArmLink::new(config).unwrap());
        let feedback_tx = UdpSocket::bind("127.0.0.1:0").unwrap();

        Self {
            link,
            relay,
            feedback_tx,
        }
    }

    fn connect(&self) {
        let frame = FeedbackFrame::new(1, FeedbackData::from_full(1, 0, [0.0; NUM_JOINTS]));
        self.feedback_tx
            .send_to(frame.encode().unwrap().as_bytes(), self.link.feedback_addr())
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        while !self.link.is_connected() {
            assert!(Instant::now() < deadline, "link never connected");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    fn count_commands(&self, window: Duration) -> usize {
        let deadline = Instant::now() + window;
        let mut count = 0;
        let mut buf = [0u8; 4096];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.relay
                .set_read_timeout(Some(remaining.min(Duration::from_millis(60))))
                .unwrap();
            if self.relay.recv_from(&mut buf).is_ok() {
                count += 1;
            }
        }
        count
    }
}

fn two_keyframe_motion(looping: bool) -> Motion {
    Motion {
        name: "test-motion".to_string(),
        keyframes: vec![
            MotionKeyframe {
                joint_angles: [0.0; NUM_JOINTS],
                transition_ms: 300,
            },
            MotionKeyframe {
                joint_angles: [5.0, 5.0, 5.0, 5.0, 5.0, 5.0, 50.0],
                transition_ms: 300,
            },
        ],
        looping,
        ..Motion::default()
    }
}

fn collect_until_stopped(events: &Receiver<PlayerEvent>, timeout: Duration) -> Vec<PlayerEvent> {
    let deadline = Instant::now() + timeout;
    let mut collected = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match events.recv_timeout(remaining) {
            Ok(event) => {
                let stop = event == PlayerEvent::Stopped;
                collected.push(event);
                if stop {
                    break;
                }
            },
            Err(_) => break,
        }
    }
    collected
}

// ============================================================
// MotionPlayer
// ============================================================

#[test]
#[serial]
fn test_play_rejects_empty_motion() {
    let harness = Harness::new(Duration::from_secs(10));
    harness.connect();
    let player = MotionPlayer::new(harness.link.clone());
    let events = player.subscribe();

    let empty = Motion::default();
    assert_eq!(player.play(empty), Err(MotionError::EmptyMotion));
    assert_eq!(player.status(), PlayerStatus::Idle);
    assert!(matches!(events.try_recv(), Ok(PlayerEvent::Error(_))));
}

#[test]
#[serial]
fn test_play_rejects_when_disconnected() {
    let harness = Harness::new(Duration::from_secs(10));
    let player = MotionPlayer::new(harness.link.clone());

    let motion = two_keyframe_motion(false);
    assert_eq!(player.play(motion), Err(MotionError::NotConnected));
    assert_eq!(player.status(), PlayerStatus::Idle);
}

#[test]
#[serial]
fn test_non_looping_playback_runs_to_completion() {
    let harness = Harness::new(Duration::from_secs(10));
    harness.connect();
    let player = MotionPlayer::new(harness.link.clone());
    let events = player.subscribe();

    player.play(two_keyframe_motion(false)).unwrap();
    assert_eq!(player.status(), PlayerStatus::Playing);

    let collected = collect_until_stopped(&events, Duration::from_secs(5));

    assert_eq!(
        collected.first(),
        Some(&PlayerEvent::Started("test-motion".to_string()))
    );
    assert_eq!(collected.last(), Some(&PlayerEvent::Stopped));

    let keyframes: Vec<usize> = collected
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::KeyframeChanged { index, total } => {
                assert_eq!(*total, 2);
                Some(*index)
            },
            _ => None,
        })
        .collect();
    assert_eq!(keyframes, vec![0, 1]);

    assert!(collected.contains(&PlayerEvent::LoopCompleted(1)));
    assert_eq!(player.status(), PlayerStatus::Idle);

    // 每个关键帧 6 条关节命令（夹爪跳过）
    assert_eq!(harness.count_commands(Duration::from_millis(300)), 12);
}

#[test]
#[serial]
fn test_looping_playback_restarts_and_stops_on_emergency() {
    let harness = Harness::new(Duration::from_secs(10));
    harness.connect();
    let player = MotionPlayer::new(harness.link.clone());
    let events = player.subscribe();

    player.play(two_keyframe_motion(true)).unwrap();

    // 等到至少完成一轮循环（循环衔接会回到帧 0）
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut looped = false;
    while Instant::now() < deadline {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(PlayerEvent::LoopCompleted(_)) => {
                looped = true;
                break;
            },
            Ok(_) => continue,
            Err(_) => continue,
        }
    }
    assert!(looped, "looping motion never completed a loop");
    assert_eq!(player.status(), PlayerStatus::Playing);

    // 急停：下一个节拍检测到并停止
    harness.link.emergency_stop();

    let collected = collect_until_stopped(&events, Duration::from_secs(5));
    assert!(
        collected
            .iter()
            .any(|e| matches!(e, PlayerEvent::Error(msg) if msg.contains("emergency"))),
        "expected an emergency stop error event, got {:?}",
        collected
    );
    assert_eq!(collected.last(), Some(&PlayerEvent::Stopped));
    assert_eq!(player.status(), PlayerStatus::Idle);
}

#[test]
#[serial]
fn test_pause_resume_cycle() {
    let harness = Harness::new(Duration::from_secs(10));
    harness.connect();
    let player = MotionPlayer::new(harness.link.clone());
    let events = player.subscribe();

    player.play(two_keyframe_motion(true)).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    player.pause();
    let deadline = Instant::now() + Duration::from_secs(2);
    while player.status() != PlayerStatus::Paused {
        assert!(Instant::now() < deadline, "player never paused");
        std::thread::sleep(Duration::from_millis(10));
    }

    player.resume();
    let deadline = Instant::now() + Duration::from_secs(2);
    while player.status() != PlayerStatus::Playing {
        assert!(Instant::now() < deadline, "player never resumed");
        std::thread::sleep(Duration::from_millis(10));
    }

    player.stop();
    assert_eq!(player.status(), PlayerStatus::Idle);

    let collected: Vec<PlayerEvent> = events.try_iter().collect();
    assert!(collected.contains(&PlayerEvent::Paused));
    assert!(collected.contains(&PlayerEvent::Resumed));
}

#[test]
#[serial]
fn test_speed_clamped() {
    let harness = Harness::new(Duration::from_secs(10));
    let player = MotionPlayer::new(harness.link.clone());

    player.set_speed(10);
    assert_eq!(player.speed(), 25);
    player.set_speed(1000);
    assert_eq!(player.speed(), 400);
    player.set_speed(150);
    assert_eq!(player.speed(), 150);
}

// ============================================================
// MotionRecorder
// ============================================================

#[test]
#[serial]
fn test_recording_rejected_when_disconnected() {
    let harness = Harness::new(Duration::from_secs(10));
    let recorder = MotionRecorder::new(harness.link.clone());
    let events = recorder.subscribe();

    assert_eq!(recorder.start(None), Err(MotionError::NotConnected));
    assert!(!recorder.is_recording());
    assert_eq!(recorder.keyframe_count(), 0);
    assert!(matches!(events.try_recv(), Ok(RecorderEvent::Error(_))));
}

#[test]
#[serial]
fn test_manual_recording_produces_playable_motion() {
    let harness = Harness::new(Duration::from_secs(10));
    harness.connect();
    let recorder = MotionRecorder::new(harness.link.clone());
    let events = recorder.subscribe();

    recorder.start(Some("grab-cycle")).unwrap();
    assert!(recorder.is_recording());
    assert_eq!(recorder.keyframe_count(), 1); // 首帧立即采样

    std::thread::sleep(Duration::from_millis(150));
    recorder.capture_keyframe().unwrap();
    std::thread::sleep(Duration::from_millis(150));
    recorder.capture_keyframe().unwrap();

    let motion = recorder.stop().unwrap();
    assert!(!recorder.is_recording());

    assert_eq!(motion.name, "grab-cycle");
    assert_eq!(motion.keyframe_count(), 4); // 首帧 + 2 手动 + 末帧
    assert!(motion.is_persistable());

    // 首帧固定下限；后续帧按实际间隔打时间戳（不低于下限）
    assert_eq!(motion.keyframes[0].transition_ms, 100);
    assert!(motion.keyframes[1].transition_ms >= 100);
    assert!(motion.keyframes[2].transition_ms >= 100);

    let collected: Vec<RecorderEvent> = events.try_iter().collect();
    assert_eq!(collected.first(), Some(&RecorderEvent::Started("grab-cycle".to_string())));
    assert!(matches!(collected.last(), Some(RecorderEvent::Stopped(_))));
}

#[test]
#[serial]
fn test_auto_capture_samples_on_interval() {
    let harness = Harness::new(Duration::from_secs(10));
    harness.connect();
    let recorder = MotionRecorder::new(harness.link.clone());

    recorder.set_auto_capture(true, 60);
    recorder.start(None).unwrap();

    std::thread::sleep(Duration::from_millis(400));
    let motion = recorder.stop().unwrap();

    // 首帧 + 若干自动采样 + 末帧
    assert!(
        motion.keyframe_count() >= 4,
        "expected several auto captures, got {}",
        motion.keyframe_count()
    );
    assert!(motion.name.starts_with("Motion_"), "generated name: {}", motion.name);
}

#[test]
#[serial]
fn test_auto_capture_interval_floor() {
    let harness = Harness::new(Duration::from_secs(10));
    harness.connect();
    let recorder = MotionRecorder::new(harness.link.clone());

    // 10ms 请求被抬到 50ms 下限：400ms 内至多 ~8 次自动采样
    recorder.set_auto_capture(true, 10);
    recorder.start(None).unwrap();
    std::thread::sleep(Duration::from_millis(400));
    let motion = recorder.stop().unwrap();

    assert!(
        motion.keyframe_count() <= 12,
        "interval floor violated: {} keyframes",
        motion.keyframe_count()
    );
}

#[test]
#[serial]
fn test_disconnect_during_recording_cancels() {
    // 短存活超时：注入一包反馈后保持静默即可断连
    let harness = Harness::new(Duration::from_millis(300));
    harness.connect();
    let recorder = MotionRecorder::new(harness.link.clone());
    let events = recorder.subscribe();

    recorder.start(Some("doomed")).unwrap();
    assert!(recorder.is_recording());

    // 等待链路判定断连
    let deadline = Instant::now() + Duration::from_secs(2);
    while harness.link.is_connected() {
        assert!(Instant::now() < deadline, "link never disconnected");
        std::thread::sleep(Duration::from_millis(20));
    }

    // 断连期间采样：录制被取消而非保留
    assert_eq!(recorder.capture_keyframe(), Err(MotionError::NotConnected));
    assert!(!recorder.is_recording());
    assert_eq!(recorder.stop(), Err(MotionError::NotRecording));

    let collected: Vec<RecorderEvent> = events.try_iter().collect();
    assert!(collected.contains(&RecorderEvent::Cancelled));
}

#[test]
#[serial]
fn test_double_start_rejected() {
    let harness = Harness::new(Duration::from_secs(10));
    harness.connect();
    let recorder = MotionRecorder::new(harness.link.clone());

    recorder.start(Some("first")).unwrap();
    assert_eq!(recorder.start(Some("second")), Err(MotionError::AlreadyRecording));

    let motion = recorder.stop().unwrap();
    assert_eq!(motion.name, "first");
}
