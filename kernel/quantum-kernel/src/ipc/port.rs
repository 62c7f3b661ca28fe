//! Port registry and message queues.
//!
//! A port is a named, bounded FIFO owned by one task. Messages are copied
//! into kernel-owned queue slots at send time (the kernel stamps the sender
//! id) and copied out at receive time. Handle-bearing messages additionally
//! carry an [`Attachment`] that the receive path installs into the
//! receiver's handle table.
//!
//! Everything here is non-blocking bookkeeping: the `try_*` operations
//! either complete or report why they cannot, and the caller decides
//! whether to park the task (see [`super::blocking`]). Waiter lists record
//! arrival order so wake-up is FIFO.

extern crate alloc;

use alloc::sync::Arc;

use planck_noalloc::vec::ArrayVec;
use quantum_abi::SysError;
use quantum_abi::ipc::{MAX_PAYLOAD_BYTES, MAX_QUEUE_DEPTH, PortRights};
use quantum_core::sync::IrqSpinLock;

use crate::obj::{KernelObject, ObjectKind};

/// Maximum number of live ports.
pub const MAX_PORTS: usize = 32;

/// Maximum parked tasks per wait list.
const MAX_WAITERS: usize = 16;

/// Longest IRQ notification template a port can carry.
const MAX_IRQ_TEMPLATE_BYTES: usize = 64;

/// Task id type (mirrors `sched::TaskId`).
type TaskId = u32;

/// A kernel object travelling inside a message.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Object type, re-checked at install time.
    pub kind: ObjectKind,
    /// The referenced object (one refcount held by the queue slot).
    pub object: Arc<KernelObject>,
    /// Rights granted to the receiver.
    pub rights: u32,
}

struct QueuedMessage {
    sender: TaskId,
    length: u32,
    payload: [u8; MAX_PAYLOAD_BYTES],
    attachment: Option<Attachment>,
}

/// A message handed to a receiver, attachment included.
#[derive(Debug)]
pub struct ReceivedMessage {
    /// Sender task id as stamped by the kernel.
    pub sender: TaskId,
    /// Valid payload length.
    pub length: u32,
    /// Payload bytes.
    pub payload: [u8; MAX_PAYLOAD_BYTES],
    /// Transferred object, if the message was handle-bearing.
    pub attachment: Option<Attachment>,
}

/// Outcome of an interrupt-context notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqNotify {
    /// The template was enqueued; wake this receiver, if any.
    Delivered(Option<TaskId>),
    /// The queue was full; the notification was counted as dropped.
    Dropped,
    /// The port is gone or carries no template.
    Unbound,
}

/// Outcome of a failed send, handing any attachment back to the caller so
/// no reference is leaked.
#[derive(Debug)]
pub struct SendRejected {
    /// Why the send failed.
    pub error: SysError,
    /// The attachment the queue did not take.
    pub attachment: Option<Attachment>,
}

struct Port {
    id: u32,
    owner: TaskId,
    creation_rights: PortRights,
    object: Arc<KernelObject>,
    queue: [Option<QueuedMessage>; MAX_QUEUE_DEPTH],
    head: usize,
    count: usize,
    send_waiters: ArrayVec<TaskId, MAX_WAITERS>,
    recv_waiters: ArrayVec<TaskId, MAX_WAITERS>,
    irq_template: Option<([u8; MAX_IRQ_TEMPLATE_BYTES], u32)>,
    dropped_irqs: u32,
}

impl Port {
    fn is_full(&self) -> bool {
        self.count == MAX_QUEUE_DEPTH
    }

    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn enqueue(&mut self, message: QueuedMessage) {
        debug_assert!(!self.is_full());
        let tail = (self.head + self.count) % MAX_QUEUE_DEPTH;
        self.queue[tail] = Some(message);
        self.count += 1;
    }

    fn dequeue(&mut self) -> Option<QueuedMessage> {
        if self.is_empty() {
            return None;
        }
        let message = self.queue[self.head].take();
        self.head = (self.head + 1) % MAX_QUEUE_DEPTH;
        self.count -= 1;
        message
    }
}

/// Pops the longest-waiting task from a waiter list (arrival order).
fn pop_fifo(waiters: &mut ArrayVec<TaskId, MAX_WAITERS>) -> Option<TaskId> {
    if waiters.is_empty() {
        None
    } else {
        Some(waiters.remove(0))
    }
}

fn remove_task(waiters: &mut ArrayVec<TaskId, MAX_WAITERS>, task: TaskId) {
    let mut i = 0;
    while i < waiters.len() {
        if waiters[i] == task {
            waiters.remove(i);
        } else {
            i += 1;
        }
    }
}

/// The port registry.
pub struct PortTable {
    slots: [Option<Port>; MAX_PORTS],
    next_id: u32,
}

impl PortTable {
    /// An empty registry; port ids start at 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_PORTS],
            next_id: 1,
        }
    }

    fn port(&mut self, id: u32) -> Result<&mut Port, SysError> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|p| p.id == id)
            .ok_or(SysError::NotFound)
    }

    fn port_ref(&self, id: u32) -> Result<&Port, SysError> {
        self.slots
            .iter()
            .flatten()
            .find(|p| p.id == id)
            .ok_or(SysError::NotFound)
    }

    /// Creates a port owned by `owner` with `rights` as its creation rights.
    ///
    /// Returns the new process-wide unique port id.
    pub fn create(&mut self, owner: TaskId, rights: PortRights) -> Result<u32, SysError> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(SysError::ResourceExhausted)?;
        let id = self.next_id;
        self.next_id += 1;
        self.slots[slot] = Some(Port {
            id,
            owner,
            creation_rights: rights,
            object: KernelObject::new_port(id),
            queue: [const { None }; MAX_QUEUE_DEPTH],
            head: 0,
            count: 0,
            send_waiters: ArrayVec::new(),
            recv_waiters: ArrayVec::new(),
            irq_template: None,
            dropped_irqs: 0,
        });
        Ok(id)
    }

    /// Opens a port by id, yielding its object and the granted rights.
    ///
    /// The owner may take any subset of the creation rights; other tasks
    /// are limited to Send.
    pub fn open(
        &self,
        id: u32,
        requested: PortRights,
        caller: TaskId,
    ) -> Result<(Arc<KernelObject>, PortRights), SysError> {
        let port = self.port_ref(id)?;
        let ceiling = if caller == port.owner {
            port.creation_rights
        } else {
            port.creation_rights & PortRights::SEND
        };
        if !ceiling.contains(requested) {
            return Err(SysError::PermissionDenied);
        }
        Ok((port.object.clone(), requested))
    }

    /// The owning task of `id`.
    pub fn owner_of(&self, id: u32) -> Result<TaskId, SysError> {
        Ok(self.port_ref(id)?.owner)
    }

    /// Attempts to enqueue a message.
    ///
    /// On success returns at most one parked receiver to wake. A full queue
    /// reports [`SysError::WouldBlock`]; the attachment rides back to the
    /// caller either way.
    pub fn try_send(
        &mut self,
        id: u32,
        sender: TaskId,
        payload: &[u8],
        attachment: Option<Attachment>,
    ) -> Result<Option<TaskId>, SendRejected> {
        if payload.is_empty() || payload.len() > MAX_PAYLOAD_BYTES {
            return Err(SendRejected {
                error: SysError::InvalidArgument,
                attachment,
            });
        }
        let port = match self.port(id) {
            Ok(port) => port,
            Err(error) => {
                return Err(SendRejected { error, attachment });
            }
        };
        if port.is_full() {
            return Err(SendRejected {
                error: SysError::WouldBlock,
                attachment,
            });
        }
        let mut message = QueuedMessage {
            sender,
            length: payload.len() as u32,
            payload: [0; MAX_PAYLOAD_BYTES],
            attachment,
        };
        message.payload[..payload.len()].copy_from_slice(payload);
        port.enqueue(message);
        Ok(pop_fifo(&mut port.recv_waiters))
    }

    /// Attempts to dequeue a message for the port owner.
    ///
    /// On success also returns at most one parked sender to wake. An empty
    /// queue reports [`SysError::WouldBlock`].
    pub fn try_receive(
        &mut self,
        id: u32,
        caller: TaskId,
    ) -> Result<(ReceivedMessage, Option<TaskId>), SysError> {
        let port = self.port(id)?;
        if caller != port.owner {
            return Err(SysError::PermissionDenied);
        }
        let Some(message) = port.dequeue() else {
            return Err(SysError::WouldBlock);
        };
        let wake = pop_fifo(&mut port.send_waiters);
        Ok((
            ReceivedMessage {
                sender: message.sender,
                length: message.length,
                payload: message.payload,
                attachment: message.attachment,
            },
            wake,
        ))
    }

    /// Parks `task` on the port's sender wait list.
    pub fn park_sender(&mut self, id: u32, task: TaskId) -> Result<(), SysError> {
        let port = self.port(id)?;
        if port.send_waiters.is_full() {
            return Err(SysError::ResourceExhausted);
        }
        port.send_waiters.push(task);
        Ok(())
    }

    /// Parks `task` on the port's receiver wait list.
    pub fn park_receiver(&mut self, id: u32, task: TaskId) -> Result<(), SysError> {
        let port = self.port(id)?;
        if port.recv_waiters.is_full() {
            return Err(SysError::ResourceExhausted);
        }
        port.recv_waiters.push(task);
        Ok(())
    }

    /// Removes `task` from both wait lists of `id` (timeout, destroy).
    pub fn remove_waiter(&mut self, id: u32, task: TaskId) {
        if let Ok(port) = self.port(id) {
            remove_task(&mut port.send_waiters, task);
            remove_task(&mut port.recv_waiters, task);
        }
    }

    /// Attaches the IRQ notification template delivered on every interrupt.
    pub fn set_irq_template(&mut self, id: u32, payload: &[u8]) -> Result<(), SysError> {
        if payload.is_empty() || payload.len() > MAX_IRQ_TEMPLATE_BYTES {
            return Err(SysError::InvalidArgument);
        }
        let port = self.port(id)?;
        let mut template = [0u8; MAX_IRQ_TEMPLATE_BYTES];
        template[..payload.len()].copy_from_slice(payload);
        port.irq_template = Some((template, payload.len() as u32));
        Ok(())
    }

    /// Clears the IRQ template.
    pub fn clear_irq_template(&mut self, id: u32) {
        if let Ok(port) = self.port(id) {
            port.irq_template = None;
        }
    }

    /// Enqueues the port's IRQ template from interrupt context.
    ///
    /// Never blocks: a full queue reports the drop (the caller still
    /// acknowledges the interrupt).
    pub fn notify_irq(&mut self, id: u32, sender: TaskId) -> IrqNotify {
        let Ok(port) = self.port(id) else {
            return IrqNotify::Unbound;
        };
        let Some((template, length)) = port.irq_template else {
            return IrqNotify::Unbound;
        };
        if port.is_full() {
            port.dropped_irqs += 1;
            return IrqNotify::Dropped;
        }
        let mut message = QueuedMessage {
            sender,
            length,
            payload: [0; MAX_PAYLOAD_BYTES],
            attachment: None,
        };
        message.payload[..length as usize].copy_from_slice(&template[..length as usize]);
        port.enqueue(message);
        IrqNotify::Delivered(pop_fifo(&mut port.recv_waiters))
    }

    /// IRQ notifications dropped on `id` because its queue was full.
    pub fn dropped_irqs(&self, id: u32) -> u32 {
        self.port_ref(id).map(|p| p.dropped_irqs).unwrap_or(0)
    }

    /// Number of queued messages on `id`.
    pub fn queue_len(&self, id: u32) -> Result<usize, SysError> {
        Ok(self.port_ref(id)?.count)
    }

    /// Destroys a port. Only the owner may destroy it.
    ///
    /// Returns the parked tasks that must be woken so they can observe
    /// `NotFound`. The port's queue (and any attachments) is dropped by the
    /// caller *after* releasing the registry lock.
    pub fn destroy(
        &mut self,
        id: u32,
        caller: TaskId,
    ) -> Result<(DestroyedPort, ArrayVec<TaskId, { 2 * MAX_WAITERS }>), SysError> {
        let slot = self
            .slots
            .iter()
            .position(|p| p.as_ref().is_some_and(|p| p.id == id))
            .ok_or(SysError::NotFound)?;
        let owner = self.slots[slot].as_ref().map(|p| p.owner).unwrap_or(0);
        if caller != owner {
            return Err(SysError::PermissionDenied);
        }
        let mut port = self.slots[slot].take().expect("slot checked above");
        let mut wake = ArrayVec::new();
        while let Some(task) = pop_fifo(&mut port.send_waiters) {
            wake.push(task);
        }
        while let Some(task) = pop_fifo(&mut port.recv_waiters) {
            wake.push(task);
        }
        Ok((DestroyedPort { inner: port }, wake))
    }

    /// Destroys every port owned by `task` (task exit). Returns tasks to
    /// wake; the removed ports are dropped by the caller outside the lock.
    pub fn destroy_owned_by(
        &mut self,
        task: TaskId,
        removed: &mut ArrayVec<DestroyedPort, MAX_PORTS>,
    ) -> ArrayVec<TaskId, { 2 * MAX_WAITERS }> {
        let mut wake = ArrayVec::new();
        for slot in &mut self.slots {
            let owned = slot.as_ref().is_some_and(|p| p.owner == task);
            if !owned {
                continue;
            }
            let mut port = slot.take().expect("owner checked above");
            while let Some(t) = pop_fifo(&mut port.send_waiters) {
                let _ = wake.try_push(t);
            }
            while let Some(t) = pop_fifo(&mut port.recv_waiters) {
                let _ = wake.try_push(t);
            }
            removed.push(DestroyedPort { inner: port });
        }
        wake
    }

    /// Backstop for a port object outliving its registry slot; removal is
    /// idempotent, so a dropped id that was already destroyed is a no-op.
    fn drop_port_object(&mut self, id: u32) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|p| p.id == id) {
                *slot = None;
            }
        }
    }
}

impl Default for PortTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A port removed from the registry, pending drop outside the lock.
///
/// Dropping this drains the queue, releasing any transferred objects.
pub struct DestroyedPort {
    inner: Port,
}

impl DestroyedPort {
    /// The removed port's id.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.inner.id
    }
}

// ---------------------------------------------------------------------------
// Global registry
// ---------------------------------------------------------------------------

/// Global port registry.
// Lock level: port registry (last in the fixed order). Removed ports are
// dropped only after this lock is released.
static PORTS: IrqSpinLock<PortTable> = IrqSpinLock::new(PortTable::new());

/// Runs `f` with the global port registry.
pub fn with_ports<R>(f: impl FnOnce(&mut PortTable) -> R) -> R {
    f(&mut PORTS.lock())
}

/// Called from `KernelObject::drop` for port objects.
pub(crate) fn on_port_object_dropped(port_id: u32) {
    PORTS.lock().drop_port_object(port_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantum_abi::ipc::KERNEL_SENDER;

    const OWNER: TaskId = 3;
    const PEER: TaskId = 4;

    fn table_and_port() -> (PortTable, u32) {
        let mut table = PortTable::new();
        let id = table.create(OWNER, PortRights::FULL).unwrap();
        (table, id)
    }

    #[test]
    fn ids_are_deterministic_and_unique() {
        let mut table = PortTable::new();
        // The reserved service ports rely on the first ids being 1..=4.
        for expected in 1..=4 {
            assert_eq!(table.create(OWNER, PortRights::FULL).unwrap(), expected);
        }
    }

    #[test]
    fn loopback_preserves_bytes_and_sender() {
        let (mut table, id) = table_and_port();
        // 0x1ACB00D5 then 0x1234, both little-endian.
        let payload = [0xD5, 0x00, 0xCB, 0x1A, 0x34, 0x12, 0x00, 0x00];
        table.try_send(id, OWNER, &payload, None).unwrap();
        let (message, _) = table.try_receive(id, OWNER).unwrap();
        assert_eq!(message.length, 8);
        assert_eq!(&message.payload[..8], &payload);
        assert_eq!(message.sender, OWNER);
    }

    #[test]
    fn fifo_order_is_preserved() {
        let (mut table, id) = table_and_port();
        for value in 0u8..5 {
            table.try_send(id, OWNER, &[value], None).unwrap();
        }
        for value in 0u8..5 {
            let (message, _) = table.try_receive(id, OWNER).unwrap();
            assert_eq!(message.payload[0], value);
        }
    }

    #[test]
    fn send_length_bounds() {
        let (mut table, id) = table_and_port();
        let err = table.try_send(id, OWNER, &[], None).unwrap_err();
        assert_eq!(err.error, SysError::InvalidArgument);

        let max = [0u8; MAX_PAYLOAD_BYTES];
        assert!(table.try_send(id, OWNER, &max, None).is_ok());

        let over = [0u8; MAX_PAYLOAD_BYTES + 1];
        let err = table.try_send(id, OWNER, &over, None).unwrap_err();
        assert_eq!(err.error, SysError::InvalidArgument);
    }

    #[test]
    fn full_queue_would_block() {
        let (mut table, id) = table_and_port();
        for _ in 0..MAX_QUEUE_DEPTH {
            table.try_send(id, OWNER, &[1], None).unwrap();
        }
        let err = table.try_send(id, OWNER, &[1], None).unwrap_err();
        assert_eq!(err.error, SysError::WouldBlock);
    }

    #[test]
    fn receive_requires_ownership() {
        let (mut table, id) = table_and_port();
        table.try_send(id, PEER, &[1], None).unwrap();
        assert_eq!(
            table.try_receive(id, PEER).unwrap_err(),
            SysError::PermissionDenied
        );
        assert!(table.try_receive(id, OWNER).is_ok());
    }

    #[test]
    fn open_grants_subset_of_creation_rights() {
        let mut table = PortTable::new();
        let id = table
            .create(OWNER, PortRights::SEND | PortRights::RECEIVE)
            .unwrap();
        // The owner can take what was created.
        assert!(table.open(id, PortRights::RECEIVE, OWNER).is_ok());
        // Manage was never part of the creation rights.
        assert_eq!(
            table.open(id, PortRights::MANAGE, OWNER).unwrap_err(),
            SysError::PermissionDenied
        );
        // Non-owners are limited to Send.
        assert!(table.open(id, PortRights::SEND, PEER).is_ok());
        assert_eq!(
            table.open(id, PortRights::RECEIVE, PEER).unwrap_err(),
            SysError::PermissionDenied
        );
    }

    #[test]
    fn enqueue_wakes_the_longest_waiting_receiver() {
        let (mut table, id) = table_and_port();
        table.park_receiver(id, 10).unwrap();
        table.park_receiver(id, 11).unwrap();
        let wake = table.try_send(id, OWNER, &[1], None).unwrap();
        assert_eq!(wake, Some(10));
        // At most one receiver per enqueue.
        let (_, sender_wake) = table.try_receive(id, OWNER).unwrap();
        assert_eq!(sender_wake, None);
    }

    #[test]
    fn dequeue_wakes_the_longest_waiting_sender() {
        let (mut table, id) = table_and_port();
        for _ in 0..MAX_QUEUE_DEPTH {
            table.try_send(id, OWNER, &[0], None).unwrap();
        }
        table.park_sender(id, 20).unwrap();
        table.park_sender(id, 21).unwrap();
        let (_, wake) = table.try_receive(id, OWNER).unwrap();
        assert_eq!(wake, Some(20));
    }

    #[test]
    fn removed_waiters_are_not_woken() {
        let (mut table, id) = table_and_port();
        table.park_receiver(id, 10).unwrap();
        table.remove_waiter(id, 10);
        assert_eq!(table.try_send(id, OWNER, &[1], None).unwrap(), None);
    }

    #[test]
    fn handle_transfer_rides_the_queue() {
        let (mut table, id) = table_and_port();
        let object = KernelObject::new_port(99);
        let attachment = Attachment {
            kind: ObjectKind::Port,
            object: object.clone(),
            rights: PortRights::SEND.bits(),
        };
        table
            .try_send(id, OWNER, &[0xAA], Some(attachment))
            .unwrap();
        let (message, _) = table.try_receive(id, OWNER).unwrap();
        let got = message.attachment.expect("attachment should arrive");
        assert!(Arc::ptr_eq(&got.object, &object));
        assert_eq!(got.rights, PortRights::SEND.bits());
    }

    #[test]
    fn failed_send_returns_the_attachment() {
        let (mut table, id) = table_and_port();
        for _ in 0..MAX_QUEUE_DEPTH {
            table.try_send(id, OWNER, &[0], None).unwrap();
        }
        let object = KernelObject::new_port(99);
        let attachment = Attachment {
            kind: ObjectKind::Port,
            object,
            rights: 0,
        };
        let rejected = table
            .try_send(id, OWNER, &[1], Some(attachment))
            .unwrap_err();
        assert_eq!(rejected.error, SysError::WouldBlock);
        assert!(rejected.attachment.is_some());
    }

    #[test]
    fn irq_template_delivery() {
        let (mut table, id) = table_and_port();
        let template = quantum_abi::irq::IrqMessage::notify(0).to_bytes();
        table.set_irq_template(id, &template).unwrap();

        for _ in 0..3 {
            table.notify_irq(id, KERNEL_SENDER);
        }
        for _ in 0..3 {
            let (message, _) = table.try_receive(id, OWNER).unwrap();
            assert_eq!(message.sender, KERNEL_SENDER);
            let decoded =
                quantum_abi::irq::IrqMessage::from_bytes(&message.payload).unwrap();
            assert_eq!(decoded.op, quantum_abi::irq::IrqOp::Notify as u32);
            assert_eq!(decoded.irq, 0);
        }
    }

    #[test]
    fn irq_overflow_counts_drops_without_blocking() {
        let (mut table, id) = table_and_port();
        let template = quantum_abi::irq::IrqMessage::notify(5).to_bytes();
        table.set_irq_template(id, &template).unwrap();
        for _ in 0..MAX_QUEUE_DEPTH + 3 {
            table.notify_irq(id, KERNEL_SENDER);
        }
        assert_eq!(table.queue_len(id).unwrap(), MAX_QUEUE_DEPTH);
        assert_eq!(table.dropped_irqs(id), 3);
    }

    #[test]
    fn destroy_requires_ownership_and_wakes_waiters() {
        let (mut table, id) = table_and_port();
        table.park_receiver(id, 10).unwrap();
        assert!(matches!(
            table.destroy(id, PEER),
            Err(SysError::PermissionDenied)
        ));
        let (removed, wake) = table.destroy(id, OWNER).unwrap();
        assert_eq!(removed.id(), id);
        assert_eq!(wake.len(), 1);
        assert_eq!(
            table.try_receive(id, OWNER).unwrap_err(),
            SysError::NotFound
        );
    }

    #[test]
    fn task_exit_destroys_owned_ports() {
        let mut table = PortTable::new();
        let a = table.create(OWNER, PortRights::FULL).unwrap();
        let b = table.create(PEER, PortRights::FULL).unwrap();
        let mut removed = ArrayVec::new();
        table.destroy_owned_by(OWNER, &mut removed);
        assert_eq!(removed.len(), 1);
        assert_eq!(table.owner_of(a).unwrap_err(), SysError::NotFound);
        assert_eq!(table.owner_of(b).unwrap(), PEER);
    }

    #[test]
    fn registry_holds_the_port_object_alive() {
        let (mut table, id) = table_and_port();
        let (object, _) = table.open(id, PortRights::SEND, PEER).unwrap();
        drop(object);
        // Handle dropped; the registry's reference keeps the port live.
        assert!(table.owner_of(id).is_ok());
    }
}
