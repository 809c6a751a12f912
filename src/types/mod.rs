//! 类型系统模块：定义调度请求、消息与执行轨迹的核心数据类型。
//!
//! # Types Module
//!
//! Core data model shared by every component of the dispatcher.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Message`] | Chat message with role and text content |
//! | [`BackendConfig`] | One `(provider, model, temperature?)` candidate |
//! | [`Strategy`] | Execution policy for a dispatch |
//! | [`DispatchRequest`] | Validated dispatch request |
//! | [`Span`] | One attempt against one backend |
//! | [`Trace`] | Aggregate of all spans of one dispatch |
//! | [`BackendResult`] | Caller-facing per-backend outcome |
//!
//! ## Example
//!
//! ```rust
//! use ai_dispatch::types::{BackendConfig, DispatchRequest, Message, Strategy};
//!
//! let request = DispatchRequest::new(
//!     vec![BackendConfig::new("openai", "gpt-4o-mini")],
//!     vec![Message::user("What's the weather?")],
//!     Strategy::Parallel,
//! );
//! assert!(request.validate().is_ok());
//! ```

pub mod message;
pub mod request;
pub mod trace;

pub use message::{Message, MessageRole};
pub use request::{BackendConfig, DispatchRequest, Strategy};
pub use trace::{BackendResult, Span, SpanStatus, SpanTimer, Trace};
