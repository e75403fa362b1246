//! The assembled protocol engine (RFC 3411 architecture).
//!
//! [`Engine`] owns one instance of every subsystem: the local engine
//! identity, the USM key store, the message processor, the command
//! generator, and the notification receiver. A host embeds it behind a
//! [`Dispatcher`] that does the socket and timer work, feeding inbound
//! datagrams to [`Engine::receive_message`] and clock ticks to
//! [`Engine::on_tick`].
//!
//! All state lives on one thread. Callbacks run only after the record
//! they settle is gone, so a callback may submit, walk, or cancel
//! freely; the dispatcher's job counters are the one signal a host
//! needs to know when the engine has gone idle.

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::cmd::{CommandGenerator, Disposition, ResponseCallback};
use crate::dispatch::Dispatcher;
use crate::error::{Error, ErrorIndication, Result};
use crate::mp::{InboundMessage, MessageProcessor, SecurityInfo, Target};
use crate::notify::{NotificationEvent, NotificationReceiver, NotifyStats};
use crate::oid::Oid;
use crate::pdu::Pdu;
use crate::util::hex;
use crate::v3::UsmUserConfig;
use crate::v3::engine::LocalEngine;
use crate::v3::usm::{Usm, UsmStats};
use crate::walk::{self, WalkCallback, WalkStep};

/// Access-control oracle consulted before an inbound PDU is acted on.
///
/// `security` is the identity the message arrived under, `view` names
/// the facility asking, and `oid` the object being accessed.
pub trait AccessControl {
    fn is_allowed(&self, security: &SecurityInfo, view: &str, oid: &Oid) -> bool;
}

/// Access control that admits everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn is_allowed(&self, _security: &SecurityInfo, _view: &str, _oid: &Oid) -> bool {
        true
    }
}

/// One SNMP protocol engine and everything it keeps alive.
pub struct Engine {
    local: LocalEngine,
    usm: Usm,
    mp: MessageProcessor,
    cmd: CommandGenerator,
    notifications: NotificationReceiver,
    access: Box<dyn AccessControl>,
    /// Failure stashed by a walk continuation that could not submit;
    /// surfaced by the `receive_message` call that ran the callback.
    walk_error: Option<Box<Error>>,
    tick: u64,
}

impl Engine {
    pub fn new(local: LocalEngine) -> Self {
        Self {
            local,
            usm: Usm::new(),
            mp: MessageProcessor::new(),
            cmd: CommandGenerator::new(),
            notifications: NotificationReceiver::new(),
            access: Box::new(AllowAll),
            walk_error: None,
            tick: 0,
        }
    }

    /// Hook the engine clock into `dispatcher`.
    ///
    /// Call once at startup; the dispatcher is expected to invoke
    /// [`Engine::on_tick`] at the interval requested here.
    pub fn attach(&self, dispatcher: &mut dyn Dispatcher) {
        let resolution = dispatcher.timer_resolution();
        dispatcher.schedule_tick(resolution);
        tracing::debug!(
            target: "snmp_engine::engine",
            { snmp.engine_id = %hex::Bytes(self.local.engine_id()), snmp.resolution = resolution },
            "engine attached"
        );
    }

    /// This engine's snmpEngineID.
    pub fn engine_id(&self) -> &Bytes {
        self.local.engine_id()
    }

    /// Requests still waiting for an outcome.
    pub fn outstanding(&self) -> usize {
        self.cmd.outstanding()
    }

    pub fn add_usm_user(&mut self, config: UsmUserConfig) -> Result<()> {
        self.usm.add_user(config)
    }

    pub fn remove_usm_user(&mut self, user_name: &[u8]) -> bool {
        self.usm.remove_user(user_name)
    }

    pub fn usm_stats(&self) -> UsmStats {
        self.usm.stats()
    }

    pub fn notify_stats(&self) -> NotifyStats {
        self.notifications.stats()
    }

    /// Replace the access-control oracle (the default admits all).
    pub fn set_access_control(&mut self, access: impl AccessControl + 'static) {
        self.access = Box::new(access);
    }

    /// Register the callback run for every accepted notification.
    pub fn on_notification<F>(&mut self, callback: F)
    where
        F: FnMut(&NotificationEvent) + 'static,
    {
        self.notifications.set_callback(callback);
    }

    /// Send a confirmed-class PDU and run `callback` when it settles.
    ///
    /// On success one job is opened on the dispatcher; it closes when
    /// the callback fires or the request is cancelled. The returned
    /// handle identifies the request to [`Engine::cancel`]. A send
    /// failure on the first attempt is returned directly and the
    /// callback never runs.
    pub fn submit(
        &mut self,
        dispatcher: &mut dyn Dispatcher,
        target: Target,
        pdu: Pdu,
        callback: ResponseCallback,
    ) -> Result<u32> {
        let handle = self.cmd.submit(
            &mut self.mp,
            &mut self.usm,
            dispatcher,
            self.tick,
            target,
            pdu,
            callback,
        )?;
        dispatcher.job_started();
        Ok(handle)
    }

    /// Drop a pending request without running its callback.
    ///
    /// Returns false when nothing was pending under `request_handle`.
    pub fn cancel(&mut self, dispatcher: &mut dyn Dispatcher, request_handle: u32) -> bool {
        let cancelled = self.cmd.cancel(&mut self.mp, request_handle);
        if cancelled {
            dispatcher.job_finished();
        }
        cancelled
    }

    /// Walk one or more columns with GetNext requests.
    ///
    /// `callback` runs once per response row and returns whether the
    /// walk should continue; see [`WalkStep`] for how a walk ends.
    pub fn walk_next<F>(
        &mut self,
        dispatcher: &mut dyn Dispatcher,
        target: Target,
        oids: &[Oid],
        callback: F,
    ) -> Result<u32>
    where
        F: FnMut(&mut Engine, &mut dyn Dispatcher, &WalkStep) -> bool + 'static,
    {
        let callback: WalkCallback = Box::new(callback);
        walk::start_next(self, dispatcher, target, oids, callback)
    }

    /// Walk with GetBulk requests, `max_repetitions` rows per step.
    ///
    /// The `non_repeaters` entries are fetched once per step and never
    /// advance; only the `repeating` columns walk. Not available on v1
    /// targets.
    pub fn walk_bulk<F>(
        &mut self,
        dispatcher: &mut dyn Dispatcher,
        target: Target,
        non_repeaters: &[Oid],
        repeating: &[Oid],
        max_repetitions: i32,
        callback: F,
    ) -> Result<u32>
    where
        F: FnMut(&mut Engine, &mut dyn Dispatcher, &WalkStep) -> bool + 'static,
    {
        let callback: WalkCallback = Box::new(callback);
        walk::start_bulk(
            self,
            dispatcher,
            target,
            non_repeaters,
            repeating,
            max_repetitions,
            callback,
        )
    }

    /// Process one inbound datagram.
    ///
    /// Matched replies settle their request and run its callback;
    /// notifications go through the access check to the notification
    /// callback, informs confirmed first; rejected v3 messages get
    /// their Report sent back through `dispatcher`. Errors cover
    /// undecodable datagrams and failed sends this call itself owed,
    /// never remote outcomes.
    pub fn receive_message(
        &mut self,
        dispatcher: &mut dyn Dispatcher,
        source: SocketAddr,
        data: Bytes,
    ) -> Result<()> {
        let inbound = self
            .mp
            .prepare_data_elements(&mut self.usm, &self.local, source, data)?;
        match inbound {
            InboundMessage::Reply { entry, outcome } => {
                let disposition = self.cmd.on_reply(
                    &mut self.mp,
                    &mut self.usm,
                    dispatcher,
                    self.tick,
                    &entry,
                    outcome,
                );
                self.deliver(dispatcher, disposition);
            }
            InboundMessage::Notification { meta, pdu } => {
                self.notifications.deliver(
                    &mut self.mp,
                    &mut self.usm,
                    &self.local,
                    self.access.as_ref(),
                    dispatcher,
                    meta,
                    pdu,
                );
            }
            InboundMessage::ReportDue { data } => {
                dispatcher.send_message(source, data)?;
            }
            InboundMessage::Handled => {}
        }
        if let Some(error) = self.walk_error.take() {
            return Err(error);
        }
        Ok(())
    }

    /// Advance the engine clock one tick and expire overdue attempts.
    ///
    /// Expired attempts re-enter the retry path; requests out of
    /// budget settle with [`ErrorIndication::RequestTimedOut`].
    pub fn on_tick(&mut self, dispatcher: &mut dyn Dispatcher) {
        self.tick += 1;
        let expired = self.mp.sweep(self.tick);
        for entry in expired {
            let disposition = self.cmd.on_reply(
                &mut self.mp,
                &mut self.usm,
                dispatcher,
                self.tick,
                &entry,
                Err(ErrorIndication::RequestTimedOut),
            );
            self.deliver(dispatcher, disposition);
        }
    }

    pub(crate) fn stash_walk_error(&mut self, error: Box<Error>) {
        self.walk_error = Some(error);
    }

    /// Close the job and run the callback of a settled request.
    ///
    /// The pending record is already gone, so the callback sees the
    /// engine with this request fully retired.
    fn deliver(&mut self, dispatcher: &mut dyn Dispatcher, disposition: Disposition) {
        if let Disposition::Settled {
            request_handle,
            callback,
            outcome,
        } = disposition
        {
            dispatcher.job_finished();
            callback(self, dispatcher, request_handle, outcome);
        }
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("pending", &self.cmd.outstanding())
            .field("sends", &self.mp.outstanding())
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}
