//! dst-agent - 饥荒联机版 LLM 角色控制运行时
//!
//! 模块划分：
//! - **agent**: 无头运行时（组件装配、控制台输入、客户端轮询）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 有界队列、主控循环、后台任务、摘要、事件路由、优雅关闭
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 对话消息、地点地图、配方表、对话日志
//! - **observability**: tracing 初始化
//! - **react**: 助手消息标签解析与动作文法
//! - **tools**: 工具调用分发与世界快照渲染
//! - **world**: 客户端感知数据与世界快照

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
pub mod world;
