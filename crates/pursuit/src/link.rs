//! Client end of the shared-memory link: the turn gate plus the segment
//! registry, and the write → hand-off → wait → classify cycle.

use std::time::Duration;

use pursuit_shm::layout::NOT_ACKNOWLEDGED;
use pursuit_shm::{
    Channel, Namespace, ReleaseError, ReturnCode, SegmentRegistry, TurnGate, TurnWait,
};

use crate::decoder::{self, Handoff};
use crate::error::{Error, Result, SyncOperation};

pub(crate) struct Link {
    gate: TurnGate,
    registry: SegmentRegistry,
}

impl Link {
    /// Create both turn locks, unavailable to either side.
    pub(crate) fn open(namespace: &Namespace) -> Result<Self> {
        let gate = TurnGate::create(namespace)
            .map_err(|e| Error::creation(format!("turn locks of {namespace}"), e))?;
        Ok(Self {
            gate,
            registry: SegmentRegistry::new(namespace.clone()),
        })
    }

    pub(crate) fn create_segment(&mut self, channel: Channel, len: usize) -> Result<()> {
        let name = self.registry.namespace().object_name(channel);
        self.registry
            .create(channel, len)
            .map_err(|e| Error::creation(name, e))?;
        Ok(())
    }

    pub(crate) fn segment_len(&self, channel: Channel) -> Option<usize> {
        self.registry.get(channel).map(|s| s.len())
    }

    pub(crate) fn write(&mut self, channel: Channel, bytes: &[u8]) -> Result<()> {
        self.registry
            .segment_mut(channel)
            .and_then(|s| s.write(0, bytes))
            .map_err(|e| Error::sync(SyncOperation::Write(channel), e))
    }

    pub(crate) fn read_array<const N: usize>(&self, channel: Channel) -> Result<[u8; N]> {
        self.registry
            .segment(channel)
            .and_then(|s| s.read_array::<N>())
            .map_err(|e| Error::sync(SyncOperation::Read(channel), e))
    }

    pub(crate) fn read_vec(&self, channel: Channel) -> Result<Vec<u8>> {
        self.registry
            .segment(channel)
            .and_then(|s| s.to_vec())
            .map_err(|e| Error::sync(SyncOperation::Read(channel), e))
    }

    /// One full hand-off: arm the sentinel, give the turn away, wait for it
    /// back within `timeout` and classify the answer.
    ///
    /// All request payloads must already be written.
    pub(crate) fn exchange(&mut self, handoff: Handoff, timeout: Duration) -> Result<()> {
        self.write(Channel::ReturnCode, &[NOT_ACKNOWLEDGED])?;

        self.gate
            .hand_off()
            .map_err(|e| Error::sync(SyncOperation::HandOff, e))?;
        let wait = self
            .gate
            .await_turn(timeout)
            .map_err(|e| Error::sync(SyncOperation::AwaitTurn, e))?;

        // The segments are only ours again if the turn came back.
        let code = match wait {
            TurnWait::Granted => {
                let [byte] = self.read_array::<1>(Channel::ReturnCode)?;
                ReturnCode::from_byte(byte)
            }
            TurnWait::TimedOut => ReturnCode::NotAcknowledged,
        };

        let verdict = decoder::classify(wait, code);
        let result = verdict.into_result(handoff, timeout);
        if let Err(e) = &result {
            tracing::warn!(%handoff, ?verdict, "hand-off failed: {}", e);
        } else {
            tracing::trace!(%handoff, "hand-off acknowledged");
        }
        result
    }

    /// Release every segment and both locks. Keeps going past failures.
    pub(crate) fn release(&mut self) -> Vec<ReleaseError> {
        let mut failures = self.registry.release_all();
        failures.extend(self.gate.release());
        for e in &failures {
            tracing::warn!("{}", e);
        }
        failures
    }
}
