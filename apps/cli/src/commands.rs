//! 子命令实现
//!
//! 每个子命令独立建链（one-shot 模式）：建链 → 等待第一包反馈 →
//! 执行 → 退出。标定文件存在时把软限位与 home 位应用到链路。

use anyhow::{Context, Result, bail};
use d1_link::{ArmLink, LinkConfig};
use d1_motion::{MotionPlayer, MotionRecorder, PlayerEvent};
use d1_protocol::NUM_JOINTS;
use d1_tools::{CalibrationData, MotionLibrary};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 等待第一包反馈的时限
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// 建链并应用标定
fn open_link(calibration_path: &str) -> Result<Arc<ArmLink>> {
    let link = ArmLink::new(LinkConfig::default()).context("failed to initialize arm link")?;

    if Path::new(calibration_path).exists() {
        let calibration = CalibrationData::load(calibration_path)?;
        let mut home = [0.0; NUM_JOINTS];
        for joint in 0..NUM_JOINTS {
            let jc = calibration.joint(joint);
            if calibration.soft_limits_enabled {
                link.set_joint_limits(joint, jc.min_angle, jc.max_angle);
            }
            home[joint] = jc.home_angle;
        }
        link.set_home_position(home);
        tracing::info!(path = calibration_path, "calibration applied");
    }

    Ok(Arc::new(link))
}

/// 阻塞等待链路连接
fn wait_for_connection(link: &ArmLink) -> Result<()> {
    let deadline = Instant::now() + CONNECT_TIMEOUT;
    while !link.is_connected() {
        if Instant::now() >= deadline {
            bail!(
                "no feedback from the robot within {:?} - is d1_udp_relay running?",
                CONNECT_TIMEOUT
            );
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    Ok(())
}

pub fn status(calibration_path: &str) -> Result<()> {
    let link = open_link(calibration_path)?;

    // 状态来自反馈流；给存活窗口一点时间
    let connected = wait_for_connection(&link).is_ok();
    let state = link.snapshot();

    println!("connected:    {}", connected);
    println!("power:        {:?}", state.power_status);
    println!("error_status: {}", state.error_status);
    for (joint, js) in state.joints.iter().enumerate() {
        println!(
            "joint {}: {:8.2}°  (limits {:.1}° .. {:.1}°)",
            joint, js.angle, js.min_limit, js.max_limit
        );
    }
    Ok(())
}

pub fn power(calibration_path: &str, on: bool) -> Result<()> {
    let link = open_link(calibration_path)?;
    if on {
        wait_for_connection(&link)?;
        link.enable_motors();
        // 上电序列为 0/150/300ms 三连发 + 600ms 位置固定
        std::thread::sleep(Duration::from_millis(1200));
        println!("motors enabled");
    } else {
        link.disable_motors();
        std::thread::sleep(Duration::from_millis(100));
        println!("motors disabled");
    }
    Ok(())
}

pub fn move_joint(calibration_path: &str, joint: usize, angle: f64, delay_ms: u32) -> Result<()> {
    if joint >= NUM_JOINTS {
        bail!("joint index must be 0..{}", NUM_JOINTS - 1);
    }

    let link = open_link(calibration_path)?;
    wait_for_connection(&link)?;

    let clamped = link.clamp_angle(joint, angle);
    if clamped != angle {
        println!("requested {:.2}° clamped to {:.2}°", angle, clamped);
    }

    link.set_joint_angle(joint, angle, delay_ms);
    std::thread::sleep(Duration::from_millis(delay_ms as u64 + 200));
    println!("joint {} -> {:.2}°", joint, clamped);
    Ok(())
}

pub fn home(calibration_path: &str) -> Result<()> {
    let link = open_link(calibration_path)?;
    wait_for_connection(&link)?;

    link.move_to_home();
    // 回 home 的过渡时间上限 4s，再加错峰分发余量
    std::thread::sleep(Duration::from_millis(4500));
    println!("moved to home position");
    Ok(())
}

pub fn grip(calibration_path: &str, percent: u32) -> Result<()> {
    let link = open_link(calibration_path)?;
    wait_for_connection(&link)?;

    let fraction = (percent.min(100) as f64) / 100.0;
    link.set_gripper_position(fraction);
    std::thread::sleep(Duration::from_millis(500));
    println!("gripper -> {}%", percent.min(100));
    Ok(())
}

pub fn estop(calibration_path: &str) -> Result<()> {
    let link = open_link(calibration_path)?;
    link.emergency_stop();
    std::thread::sleep(Duration::from_millis(100));
    println!("EMERGENCY STOP sent (power off, duplicate send)");
    Ok(())
}

pub fn record(
    calibration_path: &str,
    motions_path: &str,
    seconds: u64,
    name: Option<&str>,
    interval_ms: u64,
) -> Result<()> {
    let link = open_link(calibration_path)?;
    wait_for_connection(&link)?;

    let recorder = MotionRecorder::new(link.clone());
    recorder.set_auto_capture(true, interval_ms);
    recorder
        .start(name)
        .map_err(|e| anyhow::anyhow!("failed to start recording: {}", e))?;

    println!("recording for {}s...", seconds);
    std::thread::sleep(Duration::from_secs(seconds));

    let motion = recorder
        .stop()
        .map_err(|e| anyhow::anyhow!("recording failed: {}", e))?;

    if !motion.is_persistable() {
        bail!("recording too short ({} keyframes), discarded", motion.keyframe_count());
    }

    let mut library = if Path::new(motions_path).exists() {
        MotionLibrary::load(motions_path)?
    } else {
        MotionLibrary::new()
    };

    println!(
        "recorded '{}': {} keyframes, {} ms",
        motion.name,
        motion.keyframe_count(),
        motion.total_duration_ms()
    );
    library.add(motion);
    library.save(motions_path)?;
    println!("saved to {}", motions_path);
    Ok(())
}

pub fn play(calibration_path: &str, motions_path: &str, name: &str, speed: u32) -> Result<()> {
    let library = MotionLibrary::load(motions_path)
        .with_context(|| format!("failed to load motion library {}", motions_path))?;
    let motion = library
        .find_by_name(name)
        .with_context(|| format!("motion '{}' not found in {}", name, motions_path))?
        .clone();

    let link = open_link(calibration_path)?;
    wait_for_connection(&link)?;

    let player = MotionPlayer::new(link.clone());
    player.set_speed(speed);
    let events = player.subscribe();

    player
        .play(motion)
        .map_err(|e| anyhow::anyhow!("failed to start playback: {}", e))?;

    // Ctrl+C 停止回放
    let stop_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let handler_flag = stop_flag.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, std::sync::atomic::Ordering::Release);
    })
    .context("failed to set signal handler")?;

    println!("playing '{}' at {}% (Ctrl+C to stop)", name, player.speed());

    loop {
        if stop_flag.load(std::sync::atomic::Ordering::Acquire) {
            player.stop();
            println!("stopped");
            return Ok(());
        }

        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(PlayerEvent::KeyframeChanged { index, total }) => {
                println!("keyframe {}/{}", index + 1, total);
            },
            Ok(PlayerEvent::LoopCompleted(n)) => println!("loop {} completed", n),
            Ok(PlayerEvent::Error(msg)) => eprintln!("playback error: {}", msg),
            Ok(PlayerEvent::Stopped) => {
                println!("playback finished");
                return Ok(());
            },
            Ok(_) => {},
            Err(_) => {},
        }
    }
}
