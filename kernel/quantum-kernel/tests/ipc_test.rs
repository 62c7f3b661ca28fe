//! End-to-end IPC scenarios over the port registry, handle tables, and
//! the IRQ routing table.

use std::sync::Arc;

use quantum_abi::SysError;
use quantum_abi::ipc::{
    HandlePrefix, KERNEL_SENDER, MAX_QUEUE_DEPTH, PortRights, read_handle_prefix,
    write_handle_prefix,
};
use quantum_abi::irq::{IrqMessage, IrqOp};
use quantum_kernel::ipc::port::PortTable;
use quantum_kernel::ipc::Attachment;
use quantum_kernel::obj::{HandleTable, ObjectKind};

const TASK_A: u32 = 10;

/// Create → open with full rights → send → receive: payload bytes and the
/// kernel-stamped sender come back exactly.
#[test]
fn loopback_through_a_handle() {
    let mut ports = PortTable::new();
    let mut handles = HandleTable::new();

    let port_id = ports.create(TASK_A, PortRights::FULL).unwrap();
    let (object, granted) = ports.open(port_id, PortRights::FULL, TASK_A).unwrap();
    let handle = handles
        .create(ObjectKind::Port, object, granted.bits())
        .unwrap();

    // The handle authorizes the send; the registry does the work.
    let resolved = handles
        .resolve(handle, ObjectKind::Port, PortRights::SEND.bits())
        .unwrap();
    let target = resolved.port_id().unwrap();

    // {0x1ACB00D5, 0x1234} as little-endian words.
    let payload = [0xD5, 0x00, 0xCB, 0x1A, 0x34, 0x12, 0x00, 0x00];
    ports.try_send(target, TASK_A, &payload, None).unwrap();

    handles
        .resolve(handle, ObjectKind::Port, PortRights::RECEIVE.bits())
        .unwrap();
    let (message, _) = ports.try_receive(target, TASK_A).unwrap();
    assert_eq!(message.length, 8);
    assert_eq!(&message.payload[..8], &payload);
    assert_eq!(message.sender, TASK_A);
}

/// Port B's handle travels through port A; the receiver's installed handle
/// carries the narrowed rights and reaches B.
#[test]
fn handle_transfer_end_to_end() {
    let mut ports = PortTable::new();
    let mut sender_handles = HandleTable::new();
    let mut receiver_handles = HandleTable::new();

    let port_a = ports.create(TASK_A, PortRights::FULL).unwrap();
    let port_b = ports.create(TASK_A, PortRights::FULL).unwrap();

    let (object_b, granted) = ports.open(port_b, PortRights::FULL, TASK_A).unwrap();
    let handle_b = sender_handles
        .create(ObjectKind::Port, object_b, granted.bits())
        .unwrap();

    // SendHandle(A, hB, Send|Receive): narrow the rights, attach the
    // object, mark the payload with the in-band prefix.
    let transfer_rights = PortRights::SEND | PortRights::RECEIVE;
    let (kind, existing) = sender_handles.query(handle_b).unwrap();
    assert!(PortRights::from_bits_truncate(existing).contains(transfer_rights));
    let object = sender_handles.resolve(handle_b, kind, 0).unwrap().clone();

    let mut payload = [0u8; 12];
    write_handle_prefix(
        &mut payload,
        HandlePrefix {
            handle: 0,
            rights: transfer_rights,
        },
    )
    .unwrap();
    ports
        .try_send(
            port_a,
            TASK_A,
            &payload,
            Some(Attachment {
                kind,
                object,
                rights: transfer_rights.bits(),
            }),
        )
        .unwrap();

    // Receive on A: install the attachment, patch the prefix.
    let (mut message, _) = ports.try_receive(port_a, TASK_A).unwrap();
    let attachment = message.attachment.take().unwrap();
    let got = receiver_handles
        .create(attachment.kind, attachment.object, attachment.rights)
        .unwrap();
    write_handle_prefix(
        &mut message.payload,
        HandlePrefix {
            handle: got,
            rights: PortRights::from_bits_truncate(attachment.rights),
        },
    )
    .unwrap();

    let prefix = read_handle_prefix(&message.payload).unwrap();
    assert_eq!(prefix.handle, got);
    assert_eq!(prefix.rights, transfer_rights);

    let (kind, rights) = receiver_handles.query(got).unwrap();
    assert_eq!(kind, ObjectKind::Port);
    assert_eq!(rights, transfer_rights.bits());

    // "ping" through the transferred handle lands on B.
    let via = receiver_handles
        .resolve(got, ObjectKind::Port, PortRights::SEND.bits())
        .unwrap()
        .port_id()
        .unwrap();
    assert_eq!(via, port_b);
    ports.try_send(via, TASK_A, b"ping", None).unwrap();
    let (reply, _) = ports.try_receive(port_b, TASK_A).unwrap();
    assert_eq!(&reply.payload[..4], b"ping");
}

/// A zero-tick receive on an empty port reports Timeout and leaves the
/// port empty.
#[test]
fn receive_timeout_on_empty_port() {
    let mut ports = PortTable::new();
    let port = ports.create(TASK_A, PortRights::FULL).unwrap();
    // The blocking layer maps WouldBlock to Timeout when the budget is 0.
    assert_eq!(
        ports.try_receive(port, TASK_A).unwrap_err(),
        SysError::WouldBlock
    );
    assert_eq!(ports.queue_len(port).unwrap(), 0);
}

/// Three interrupts on a routed line become three Notify messages with the
/// kernel sentinel sender.
#[test]
fn irq_line_delivers_notifications() {
    use quantum_kernel::ipc::with_ports;
    use quantum_kernel::irq;

    let port = with_ports(|ports| ports.create(TASK_A, PortRights::FULL)).unwrap();
    let template = IrqMessage::notify(0).to_bytes();
    with_ports(|ports| ports.set_irq_template(port, &template)).unwrap();
    irq::with_routing(|routing| routing.bind(0, port)).unwrap();

    for _ in 0..3 {
        irq::dispatch(0);
    }

    for _ in 0..3 {
        let (message, _) = with_ports(|ports| ports.try_receive(port, TASK_A)).unwrap();
        assert_eq!(message.sender, KERNEL_SENDER);
        let decoded = IrqMessage::from_bytes(&message.payload).unwrap();
        assert_eq!(decoded.op, IrqOp::Notify as u32);
        assert_eq!(decoded.irq, 0);
    }

    irq::with_routing(|routing| routing.unbind(0)).unwrap();
}

/// The queue bounds the ladder: depth sends fit, the next would block, and
/// the try variant reports it without enqueuing anything.
#[test]
fn queue_full_ladder() {
    let mut ports = PortTable::new();
    let port = ports.create(TASK_A, PortRights::FULL).unwrap();

    for _ in 0..MAX_QUEUE_DEPTH {
        ports.try_send(port, TASK_A, &[7], None).unwrap();
    }
    let rejected = ports.try_send(port, TASK_A, &[7], None).unwrap_err();
    assert_eq!(rejected.error, SysError::WouldBlock);
    assert_eq!(ports.queue_len(port).unwrap(), MAX_QUEUE_DEPTH);
}

/// Dropping the last handle after the registry entry is gone runs the
/// object teardown exactly once and never resurrects the port.
#[test]
fn destroyed_port_handles_fail_cleanly() {
    let mut ports = PortTable::new();
    let mut handles = HandleTable::new();

    let port = ports.create(TASK_A, PortRights::FULL).unwrap();
    let (object, granted) = ports.open(port, PortRights::FULL, TASK_A).unwrap();
    let handle = handles
        .create(ObjectKind::Port, object.clone(), granted.bits())
        .unwrap();

    let (removed, _) = ports.destroy(port, TASK_A).unwrap();
    drop(removed);

    // The id no longer resolves in the registry.
    assert_eq!(
        ports.try_send(port, TASK_A, &[1], None).unwrap_err().error,
        SysError::NotFound
    );

    // The handle still resolves to the (dead) object until closed.
    assert!(handles.resolve(handle, ObjectKind::Port, 0).is_ok());
    assert_eq!(Arc::strong_count(&object), 2);
    handles.close(handle).unwrap();
    assert_eq!(Arc::strong_count(&object), 1);
}
