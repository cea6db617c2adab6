//! Event loop and concurrency core for an IRC bot.
//!
//! A [`ConnectionSupervisor`] owns the connection lifecycle and hands each live
//! connection to a [`MainLoop`], which multiplexes reads from a [`Transport`],
//! dispatch through the [`PluginCollection`], deferred continuations, and the
//! control mailbox fed by plugins through a [`MessageSender`].

pub mod abort;
pub mod config;
pub mod control;
pub mod deferred;
pub mod errors;
pub mod event;
pub mod mailbox;
pub mod main_loop;
pub mod parser;
pub mod plugin;
pub mod supervisor;
pub mod throttle;
pub mod transport;
pub mod utils;

mod dispatch;
mod tracing_config;

pub use abort::AbortFlag;
pub use config::BotConfig;
pub use control::*;
pub use deferred::{Continuation, DeferredTasks, Resumption, TaskId, Trigger};
pub use dispatch::PluginCollection;
pub use errors::*;
pub use event::*;
pub use mailbox::{mailbox, MailboxReceiver, MessageSender};
pub use main_loop::{DrainOutcome, LoopSettings, MainLoop, TerminationReason};
pub use parser::{IrcParser, Parser};
pub use plugin::{Plugin, PluginContext, PluginFactory};
pub use supervisor::{ConnectionSupervisor, ReconnectPolicy, SupervisorExit, SupervisorState};
pub use throttle::{ThrottleSettings, Throttler};
pub use transport::{Connection, ReadOutcome, TcpTransport, Transport};
pub use tracing_config::build_subscriber;
