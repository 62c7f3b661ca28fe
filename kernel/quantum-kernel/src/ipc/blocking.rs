//! Blocking IPC entry points.
//!
//! These wrappers resolve handles through the calling task's handle table,
//! drive the non-blocking port operations, and park the caller on the
//! port's wait lists when it must sleep. The check-then-park step runs
//! under the registry lock so an event cannot slip between the check and
//! the park; a wake racing the actual context switch is caught by the
//! scheduler's `pending_wake` flag.

extern crate alloc;

use planck_noalloc::vec::ArrayVec;
use quantum_abi::SysError;
use quantum_abi::handle::Handle;
use quantum_abi::ipc::{
    HANDLE_PREFIX_BYTES, HandlePrefix, Message, PortRights, write_handle_prefix,
};

use crate::obj::ObjectKind;
use crate::sched::{self, WaitOutcome};

use super::port::{Attachment, DestroyedPort, ReceivedMessage, with_ports, MAX_PORTS};

/// How long a send/receive is willing to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// Park until the event happens.
    Forever,
    /// Fail immediately with `WouldBlock`.
    NoWait,
    /// Park for at most this many timer ticks, then fail with `Timeout`.
    Ticks(u32),
}

fn resolve_port(handle: Handle, required: PortRights) -> Result<u32, SysError> {
    sched::with_scheduler(|sched| {
        sched
            .with_current(|task| {
                let object = task.handles.resolve(handle, ObjectKind::Port, required.bits())?;
                object.port_id().ok_or(SysError::NotFound)
            })
            .unwrap_or(Err(SysError::NotFound))
    })
}

fn deadline_for(wait: Wait) -> Option<u64> {
    match wait {
        Wait::Ticks(ticks) => {
            let now = sched::with_scheduler(|sched| sched.ticks());
            Some(now + u64::from(ticks))
        }
        _ => None,
    }
}

/// Creates a port owned by the calling task with full creation rights.
pub fn create_port() -> Result<u32, SysError> {
    let owner = sched::current_task_id();
    with_ports(|ports| ports.create(owner, PortRights::FULL))
}

/// Opens a handle onto `port_id` with the requested rights.
pub fn open_port(port_id: u32, rights: PortRights) -> Result<Handle, SysError> {
    let caller = sched::current_task_id();
    let (object, granted) = with_ports(|ports| ports.open(port_id, rights, caller))?;
    sched::with_scheduler(|sched| {
        sched
            .with_current(|task| {
                task.handles
                    .create(ObjectKind::Port, object.clone(), granted.bits())
            })
            .unwrap_or(Err(SysError::NotFound))
    })
}

/// Sends `payload` through a handle carrying the Send right.
pub fn send(handle: Handle, payload: &[u8], wait: Wait) -> Result<(), SysError> {
    let port_id = resolve_port(handle, PortRights::SEND)?;
    send_raw(port_id, payload, None, wait)
}

/// Sends to a raw port id (kernel-internal callers).
pub fn send_raw(
    port_id: u32,
    payload: &[u8],
    mut attachment: Option<Attachment>,
    wait: Wait,
) -> Result<(), SysError> {
    let me = sched::current_task_id();
    let deadline = deadline_for(wait);

    loop {
        enum Step {
            Sent(Option<sched::TaskId>),
            Parked,
            Failed(SysError),
        }

        let step = with_ports(|ports| {
            match ports.try_send(port_id, me, payload, attachment.take()) {
                Ok(wake) => Step::Sent(wake),
                Err(rejected) => {
                    attachment = rejected.attachment;
                    if rejected.error != SysError::WouldBlock {
                        return Step::Failed(rejected.error);
                    }
                    match wait {
                        Wait::NoWait => Step::Failed(SysError::WouldBlock),
                        Wait::Ticks(0) => Step::Failed(SysError::Timeout),
                        _ => match ports.park_sender(port_id, me) {
                            Ok(()) => Step::Parked,
                            Err(error) => Step::Failed(error),
                        },
                    }
                }
            }
        });

        match step {
            Step::Sent(wake) => {
                if let Some(task) = wake {
                    sched::wake(task);
                }
                return Ok(());
            }
            Step::Failed(error) => return Err(error),
            Step::Parked => {
                let outcome = sched::block_current(Some(port_id), deadline);
                if outcome == WaitOutcome::TimedOut {
                    with_ports(|ports| ports.remove_waiter(port_id, me));
                    return Err(SysError::Timeout);
                }
            }
        }
    }
}

/// Receives a message through a handle carrying the Receive right.
///
/// Handle-bearing messages have the transferred object installed into the
/// caller's handle table and the in-band prefix patched with the new
/// handle before the message is returned.
pub fn receive(handle: Handle, wait: Wait) -> Result<Message, SysError> {
    let port_id = resolve_port(handle, PortRights::RECEIVE)?;
    receive_raw(port_id, wait)
}

/// Receives from a raw port id (kernel-internal callers; caller must be the
/// port owner).
pub fn receive_raw(port_id: u32, wait: Wait) -> Result<Message, SysError> {
    let me = sched::current_task_id();
    let deadline = deadline_for(wait);

    loop {
        enum Step {
            Got(ReceivedMessage, Option<sched::TaskId>),
            Parked,
            Failed(SysError),
        }

        let step = with_ports(|ports| match ports.try_receive(port_id, me) {
            Ok((message, wake)) => Step::Got(message, wake),
            Err(SysError::WouldBlock) => match wait {
                Wait::NoWait => Step::Failed(SysError::WouldBlock),
                Wait::Ticks(0) => Step::Failed(SysError::Timeout),
                _ => match ports.park_receiver(port_id, me) {
                    Ok(()) => Step::Parked,
                    Err(error) => Step::Failed(error),
                },
            },
            Err(error) => Step::Failed(error),
        });

        match step {
            Step::Got(message, wake) => {
                if let Some(task) = wake {
                    sched::wake(task);
                }
                return deliver(message);
            }
            Step::Failed(error) => return Err(error),
            Step::Parked => {
                let outcome = sched::block_current(Some(port_id), deadline);
                if outcome == WaitOutcome::TimedOut {
                    with_ports(|ports| ports.remove_waiter(port_id, me));
                    return Err(SysError::Timeout);
                }
            }
        }
    }
}

/// Copies a received message out, installing any transferred handle.
fn deliver(message: ReceivedMessage) -> Result<Message, SysError> {
    let mut out = Message::empty();
    out.sender = message.sender;
    out.length = message.length;
    out.payload = message.payload;

    let Some(attachment) = message.attachment else {
        return Ok(out);
    };

    let installed = sched::with_scheduler(|sched| {
        sched
            .with_current(|task| {
                task.handles
                    .create(attachment.kind, attachment.object.clone(), attachment.rights)
            })
            .unwrap_or(Err(SysError::NotFound))
    });

    match installed {
        Ok(new_handle) => {
            let prefix = HandlePrefix {
                handle: new_handle,
                rights: PortRights::from_bits_truncate(attachment.rights),
            };
            write_handle_prefix(&mut out.payload, prefix).ok_or(SysError::InvalidArgument)?;
            Ok(out)
        }
        Err(error) => {
            // Receiver table full: the message is dropped and the object's
            // queue reference released (attachment drops here).
            crate::kwarn!("ipc: handle transfer dropped, receiver table full");
            Err(error)
        }
    }
}

/// Transfers `transfer` (with narrowed `rights`) through `port_handle`.
pub fn send_handle(
    port_handle: Handle,
    transfer: Handle,
    rights: PortRights,
    wait: Wait,
) -> Result<(), SysError> {
    let port_id = resolve_port(port_handle, PortRights::SEND)?;

    let attachment = sched::with_scheduler(|sched| {
        sched
            .with_current(|task| {
                let (kind, existing) = task.handles.query(transfer)?;
                let granted = if rights.is_empty() {
                    existing
                } else {
                    rights.bits()
                };
                if granted & !existing != 0 {
                    return Err(SysError::PermissionDenied);
                }
                let object = task.handles.resolve(transfer, kind, 0)?.clone();
                Ok(Attachment {
                    kind,
                    object,
                    rights: granted,
                })
            })
            .unwrap_or(Err(SysError::NotFound))
    })?;

    let mut payload = [0u8; HANDLE_PREFIX_BYTES];
    write_handle_prefix(
        &mut payload,
        HandlePrefix {
            handle: 0,
            rights: PortRights::from_bits_truncate(attachment.rights),
        },
    )
    .ok_or(SysError::InvalidArgument)?;

    send_raw(port_id, &payload, Some(attachment), wait)
}

/// Destroys a port through a handle carrying the Manage right.
pub fn destroy_port(handle: Handle) -> Result<(), SysError> {
    let port_id = resolve_port(handle, PortRights::MANAGE)?;
    let me = sched::current_task_id();

    let (removed, wake) = with_ports(|ports| ports.destroy(port_id, me))?;
    crate::irq::unbind_port(port_id);
    for task in wake.iter() {
        sched::wake(*task);
    }
    // Queue (and any attachments) drops outside the registry lock.
    drop(removed);
    Ok(())
}

/// Closes a handle in the calling task's table.
pub fn close_handle(handle: Handle) -> Result<(), SysError> {
    sched::with_scheduler(|sched| {
        sched
            .with_current(|task| task.handles.close(handle))
            .unwrap_or(Err(SysError::NotFound))
    })
}

/// Queries a handle's type and rights.
pub fn query_handle(handle: Handle) -> Result<(ObjectKind, u32), SysError> {
    sched::with_scheduler(|sched| {
        sched
            .with_current(|task| task.handles.query(handle))
            .unwrap_or(Err(SysError::NotFound))
    })
}

/// IPC-side cleanup when a task exits: leaves any wait list and destroys
/// the ports it owned, waking their parked peers.
pub fn on_task_exit(task: sched::TaskId, wait_port: Option<u32>) {
    let mut removed: ArrayVec<DestroyedPort, MAX_PORTS> = ArrayVec::new();
    let wake = with_ports(|ports| {
        if let Some(port) = wait_port {
            ports.remove_waiter(port, task);
        }
        ports.destroy_owned_by(task, &mut removed)
    });
    for port in removed.iter() {
        crate::irq::unbind_port(port.id());
    }
    for peer in wake.iter() {
        sched::wake(*peer);
    }
    drop(removed);
}
