//! 恢复流程状态机
//!
//! 以固定 100ms 节拍推进的显式有限状态机，时序由阶段节拍数 ×
//! 节拍间隔决定：
//!
//! ```text
//! ResetErrors → WaitA → ReassertDisable → WaitB → EnableMotors → WaitC
//!   → VerifyPower → WaitD → HoldPosition → WaitE → FinalVerify → Done
//! ```
//!
//! 状态机本身是纯数据：每个节拍返回应执行的动作（如有），由链路的
//! 调度器真正下发命令，因此每个阶段都可以脱离网络单独测试。
//!
//! 恢复只能被显式启动；`auto_recovery_enabled` 标定项不会触发它。

/// 恢复阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStage {
    /// 断电以清除故障
    ResetErrors,
    WaitA,
    /// 再次断电并清除本地故障码
    ReassertDisable,
    WaitB,
    /// 上电
    EnableMotors,
    WaitC,
    /// 电源仍未开启则重试上电
    VerifyPower,
    WaitD,
    /// 按当前夹取后的角度重新固定各关节
    HoldPosition,
    WaitE,
    /// 最终校验（必要时最后一次重试上电）
    FinalVerify,
    Done,
}

/// 进入阶段时要执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 发送断电命令
    DisableMotors,
    /// 断电 + 清除本地故障码
    ResetErrors,
    /// 执行上电序列
    EnableMotors,
    /// 电源未开时重试上电
    RetryEnableIfPowerOff,
    /// 重新固定当前位置
    HoldPosition,
}

impl RecoveryStage {
    /// 阶段时长（节拍数）
    ///
    /// 动作阶段占 1 拍，等待阶段分别为 5/9/9/9/9 拍，
    /// FinalVerify 含动作与收尾等待共 5 拍。
    pub fn duration_ticks(self) -> u32 {
        match self {
            RecoveryStage::ResetErrors
            | RecoveryStage::ReassertDisable
            | RecoveryStage::EnableMotors
            | RecoveryStage::VerifyPower
            | RecoveryStage::HoldPosition => 1,
            RecoveryStage::WaitA => 5,
            RecoveryStage::WaitB
            | RecoveryStage::WaitC
            | RecoveryStage::WaitD
            | RecoveryStage::WaitE => 9,
            RecoveryStage::FinalVerify => 5,
            RecoveryStage::Done => 0,
        }
    }

    /// 进入阶段时触发的动作
    pub fn entry_action(self) -> Option<RecoveryAction> {
        match self {
            RecoveryStage::ResetErrors => Some(RecoveryAction::DisableMotors),
            RecoveryStage::ReassertDisable => Some(RecoveryAction::ResetErrors),
            RecoveryStage::EnableMotors => Some(RecoveryAction::EnableMotors),
            RecoveryStage::VerifyPower => Some(RecoveryAction::RetryEnableIfPowerOff),
            RecoveryStage::HoldPosition => Some(RecoveryAction::HoldPosition),
            RecoveryStage::FinalVerify => Some(RecoveryAction::RetryEnableIfPowerOff),
            _ => None,
        }
    }

    fn next(self) -> RecoveryStage {
        match self {
            RecoveryStage::ResetErrors => RecoveryStage::WaitA,
            RecoveryStage::WaitA => RecoveryStage::ReassertDisable,
            RecoveryStage::ReassertDisable => RecoveryStage::WaitB,
            RecoveryStage::WaitB => RecoveryStage::EnableMotors,
            RecoveryStage::EnableMotors => RecoveryStage::WaitC,
            RecoveryStage::WaitC => RecoveryStage::VerifyPower,
            RecoveryStage::VerifyPower => RecoveryStage::WaitD,
            RecoveryStage::WaitD => RecoveryStage::HoldPosition,
            RecoveryStage::HoldPosition => RecoveryStage::WaitE,
            RecoveryStage::WaitE => RecoveryStage::FinalVerify,
            RecoveryStage::FinalVerify => RecoveryStage::Done,
            RecoveryStage::Done => RecoveryStage::Done,
        }
    }
}

/// 一次恢复流程的运行状态
#[derive(Debug)]
pub struct RecoveryRun {
    stage: RecoveryStage,
    ticks_in_stage: u32,
}

impl RecoveryRun {
    pub fn new() -> Self {
        Self {
            stage: RecoveryStage::ResetErrors,
            ticks_in_stage: 0,
        }
    }

    pub fn stage(&self) -> RecoveryStage {
        self.stage
    }

    pub fn is_done(&self) -> bool {
        self.stage == RecoveryStage::Done
    }

    /// 推进一个节拍
    ///
    /// 进入动作阶段的第一个节拍返回该阶段的动作；等待节拍返回 `None`。
    pub fn tick(&mut self) -> Option<RecoveryAction> {
        if self.is_done() {
            return None;
        }

        let action = if self.ticks_in_stage == 0 {
            self.stage.entry_action()
        } else {
            None
        };

        self.ticks_in_stage += 1;
        if self.ticks_in_stage >= self.stage.duration_ticks() {
            self.stage = self.stage.next();
            self.ticks_in_stage = 0;
        }

        action
    }
}

impl Default for RecoveryRun {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_sequence_actions_in_order() {
        let mut run = RecoveryRun::new();
        let mut actions = Vec::new();
        let mut ticks = 0u32;

        while !run.is_done() {
            if let Some(action) = run.tick() {
                actions.push(action);
            }
            ticks += 1;
            assert!(ticks < 200, "recovery never finished");
        }

        assert_eq!(
            actions,
            vec![
                RecoveryAction::DisableMotors,
                RecoveryAction::ResetErrors,
                RecoveryAction::EnableMotors,
                RecoveryAction::RetryEnableIfPowerOff,
                RecoveryAction::HoldPosition,
                RecoveryAction::RetryEnableIfPowerOff,
            ]
        );
        // 1 + 5 + 1 + 9 + 1 + 9 + 1 + 9 + 1 + 9 + 5 = 51 拍 ≈ 5.1 秒
        assert_eq!(ticks, 51);
    }

    #[test]
    fn test_wait_ticks_produce_no_action() {
        let mut run = RecoveryRun::new();
        assert_eq!(run.tick(), Some(RecoveryAction::DisableMotors));
        assert_eq!(run.stage(), RecoveryStage::WaitA);

        for _ in 0..5 {
            assert_eq!(run.tick(), None);
        }
        assert_eq!(run.stage(), RecoveryStage::ReassertDisable);
    }

    #[test]
    fn test_done_stays_done() {
        let mut run = RecoveryRun::new();
        while !run.is_done() {
            run.tick();
        }
        assert!(run.is_done());
        assert_eq!(run.tick(), None);
        assert!(run.is_done());
    }
}
