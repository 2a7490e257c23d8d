//! # D1 CLI
//!
//! Command-line front end for D1 arm control.
//!
//! ```bash
//! # 查询当前状态
//! d1-cli status
//!
//! # 移动单关节（角度先过软限位）
//! d1-cli move 0 45.0 --delay-ms 800
//!
//! # 录制 5 秒并保存到动作库
//! d1-cli record --seconds 5 --name wave
//!
//! # 回放
//! d1-cli play wave --speed 150
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

/// D1 CLI - 机械臂命令行工具
#[derive(Parser, Debug)]
#[command(name = "d1-cli")]
#[command(about = "Command-line front end for D1 arm control", long_about = None)]
#[command(version)]
struct Cli {
    /// 标定文件路径（存在则应用软限位与 home 位）
    #[arg(long, default_value = "calibration.json")]
    calibration: String,

    /// 动作库文件路径
    #[arg(long, default_value = "motions.json")]
    motions: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 查询当前状态（连接、电源、故障、关节角度）
    Status,

    /// 电源控制
    Power {
        /// on 或 off
        #[arg(value_parser = ["on", "off"])]
        mode: String,
    },

    /// 移动单关节到目标角度
    Move {
        /// 关节索引（0-6）
        joint: usize,
        /// 目标角度（度）
        angle: f64,
        /// 过渡时间（毫秒）
        #[arg(long, default_value_t = 500)]
        delay_ms: u32,
    },

    /// 回 home 位（距离配速）
    Home,

    /// 夹爪开合
    Grip {
        /// 开合百分比（0-100）
        percent: u32,
    },

    /// 急停（断电并封锁后续命令）
    Estop,

    /// 录制动作并存入动作库
    Record {
        /// 录制时长（秒）
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        /// 动作名（缺省自动生成）
        #[arg(long)]
        name: Option<String>,
        /// 自动采样间隔（毫秒）
        #[arg(long, default_value_t = 200)]
        interval_ms: u64,
    },

    /// 回放动作库中的动作
    Play {
        /// 动作名
        name: String,
        /// 回放速度（25-400%）
        #[arg(long, default_value_t = 100)]
        speed: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("d1_cli=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => commands::status(&cli.calibration),
        Commands::Power { mode } => commands::power(&cli.calibration, mode == "on"),
        Commands::Move {
            joint,
            angle,
            delay_ms,
        } => commands::move_joint(&cli.calibration, joint, angle, delay_ms),
        Commands::Home => commands::home(&cli.calibration),
        Commands::Grip { percent } => commands::grip(&cli.calibration, percent),
        Commands::Estop => commands::estop(&cli.calibration),
        Commands::Record {
            seconds,
            name,
            interval_ms,
        } => commands::record(&cli.calibration, &cli.motions, seconds, name.as_deref(), interval_ms),
        Commands::Play { name, speed } => {
            commands::play(&cli.calibration, &cli.motions, &name, speed)
        },
    }
}
