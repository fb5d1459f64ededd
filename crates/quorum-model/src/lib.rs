// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod anthropic;
mod client;
mod error;
mod mock;
mod ollama;
mod openai_compat;
mod types;

pub use client::{ChatClient, HttpChatClient};
pub use error::CallError;
pub use mock::{RecordedCall, ScriptStep, ScriptedChatClient};
pub use types::{CallContext, CallMeta, Completion};
