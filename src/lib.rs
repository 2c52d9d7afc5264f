//! Emu - 对抗模拟 C2 服务端
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **contact**: Agent 接入层（TCP 会话注册表、指令通道、Beacon 循环、协调服务）
//! - **core**: 错误类型与优雅关闭
//! - **learning**: 事实解析器（从命令输出中提取 Fact）
//! - **objects**: 领域对象（Agent、Instruction、Ability、Link、Adversary、Fact）
//! - **observability**: 日志初始化
//! - **planners**: 规划状态机、Atomic 策略与 Link 选择

pub mod config;
pub mod contact;
pub mod core;
pub mod learning;
pub mod objects;
pub mod observability;
pub mod planners;
