//! # snmp-engine
//!
//! Transport-independent SNMP protocol engine for Rust.
//!
//! The engine speaks SNMPv1, v2c, and v3 (USM) but never touches a
//! socket or a timer: the host supplies a [`Dispatcher`] for outgoing
//! datagrams and clock scheduling, and feeds received datagrams and
//! ticks back in. Everything in between, from BER and the
//! message-processing state machine to engine-id discovery, time
//! synchronization, retries, and notification handling, lives here.
//!
//! ## Features
//!
//! - Full SNMPv1, v2c, and v3 (USM) support
//! - Transport-independent: the host owns sockets, timers, and threads
//! - Engine-id discovery, time sync, and retry handled internally
//! - Zero-copy BER encoding/decoding
//! - Type-safe OID and value handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snmp_engine::dispatch::RecordingDispatcher;
//! use snmp_engine::{Engine, LocalEngine, Pdu, Target, Version, oid};
//!
//! fn main() -> snmp_engine::Result<()> {
//!     let mut engine = Engine::new(LocalEngine::with_random_id());
//!     let mut dispatcher = RecordingDispatcher::new();
//!     engine.attach(&mut dispatcher);
//!
//!     let target = Target::community("192.0.2.1:161".parse().unwrap(), Version::V2c, "public");
//!     engine.submit(
//!         &mut dispatcher,
//!         target,
//!         Pdu::get_request(0, &[oid!(1, 3, 6, 1, 2, 1, 1, 1, 0)]),
//!         Box::new(|_engine, _dispatcher, _handle, outcome| {
//!             println!("sysDescr: {outcome:?}");
//!         }),
//!     )?;
//!
//!     // Feed datagrams from the socket into `Engine::receive_message`
//!     // and clock ticks into `Engine::on_tick`; the callback runs when
//!     // the response arrives or the retry budget runs out.
//!     Ok(())
//! }
//! ```
//!
//! ## SNMPv3 Example
//!
//! ```rust,no_run
//! use snmp_engine::dispatch::RecordingDispatcher;
//! use snmp_engine::v3::{AuthProtocol, PrivProtocol, UsmUserConfig};
//! use snmp_engine::{Engine, LocalEngine, SecurityLevel, Target, oid};
//!
//! fn main() -> snmp_engine::Result<()> {
//!     let mut engine = Engine::new(LocalEngine::with_random_id());
//!     let mut dispatcher = RecordingDispatcher::new();
//!     engine.add_usm_user(
//!         UsmUserConfig::new("admin")
//!             .auth(AuthProtocol::Sha256, "authpass123")
//!             .privacy(PrivProtocol::Aes128, "privpass123"),
//!     )?;
//!
//!     let target = Target::usm("192.0.2.1:161".parse().unwrap(), "admin", SecurityLevel::AuthPriv);
//!     engine.walk_next(&mut dispatcher, target, &[oid!(1, 3, 6, 1, 2, 1, 2, 2)], |_, _, step| {
//!         for vb in &step.varbinds {
//!             println!("{} = {}", vb.oid, vb.value);
//!         }
//!         step.indication.is_none()
//!     })?;
//!     Ok(())
//! }
//! ```

pub mod ber;
pub mod cmd;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod message;
pub mod mp;
pub mod notify;
pub mod oid;
pub mod pdu;
pub mod v3;
pub mod value;
pub mod varbind;
pub mod walk;

pub(crate) mod cache;
pub(crate) mod util;

// Re-exports for convenience
pub use cmd::ResponseCallback;
pub use dispatch::{Dispatcher, RecordingDispatcher};
pub use engine::{AccessControl, AllowAll, Engine};
pub use error::{Error, ErrorIndication, ErrorStatus, Result};
pub use message::{SecurityLevel, Version};
pub use mp::{SecurityInfo, Target};
pub use notify::{NotificationEvent, NotifyStats};
pub use oid::Oid;
pub use pdu::{GenericTrap, Pdu, PduType, TrapV1Pdu};
pub use v3::engine::LocalEngine;
pub use v3::{AuthProtocol, PrivProtocol, UsmUserConfig};
pub use value::Value;
pub use varbind::VarBind;
pub use walk::{WalkCallback, WalkStep};
