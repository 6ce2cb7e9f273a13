//! SVC dispatch: decode the guest's r0-r3 against a known SVC number and
//! drive the matching `KernelContext` method. A tagged match rather than a
//! function-pointer table -- each handler pulls a different shape of
//! arguments out of the register file, so a uniform `fn(&mut KernelContext)`
//! signature would just push the per-SVC decoding into a second layer
//! instead of removing it.

pub mod numbers;

use crate::arbiter::ArbitrationType;
use crate::error::{ERR_INVALID_HANDLE, ERR_OUT_OF_RANGE, KernelError, RESULT_SUCCESS, ResultCode};
use crate::handle::Handle;
use crate::kernel_context::KernelContext;
use crate::memory::vm_manager::{ControlMemoryOp, MemoryRegion};
use crate::memory::vma::Permission;
use crate::process::ProcessId;
use crate::sync::event::ResetType;
use crate::thread::ThreadId;

fn region_from_flags(flags: u32) -> MemoryRegion {
    match (flags >> 8) & 0xF {
        1 => MemoryRegion::App,
        2 => MemoryRegion::System,
        3 => MemoryRegion::Base,
        _ => MemoryRegion::Linear,
    }
}

/// A command buffer with no normal words and no translate descriptors, for
/// SVC entry points that don't have guest TLS access to decode a real one.
fn empty_ipc_message() -> crate::ipc::translation::ParsedMessage {
    crate::ipc::translation::ParsedMessage {
        header: crate::ipc::translation::CommandHeader { cmd_id: 0, normal_params: 0, translate_params: 0 },
        normal_words: Vec::new(),
        descriptors: Vec::new(),
    }
}

fn op_from_flags(flags: u32) -> Option<ControlMemoryOp> {
    match flags & 0xFF {
        1 => Some(ControlMemoryOp::Commit),
        2 => Some(ControlMemoryOp::Unmap),
        3 => Some(ControlMemoryOp::Protect),
        4 => Some(ControlMemoryOp::Map),
        _ => Some(ControlMemoryOp::Free),
    }
}

fn permission_from_bits(bits: u32) -> Permission {
    Permission::from_bits_truncate(bits as u8 & 0b111)
}

/// Run one SVC on behalf of `thread`, reading arguments from and writing
/// results back into its register file. Returns the primary result code for
/// callers (mostly tests) that want it without re-reading the registers.
pub fn dispatch(ctx: &mut KernelContext, thread: ThreadId, svc: u32) -> ResultCode {
    let process = match ctx.thread(thread) {
        Ok(t) => t.process,
        Err(_) => return ERR_INVALID_HANDLE,
    };

    let rc = dispatch_inner(ctx, process, thread, svc);
    if let Ok(t) = ctx.thread_mut(thread) {
        t.registers.set_return(rc.0);
    }
    rc
}

fn dispatch_inner(ctx: &mut KernelContext, process: ProcessId, thread: ThreadId, svc: u32) -> ResultCode {
    use numbers::*;

    let args = ctx.thread(thread).map(|t| t.registers).unwrap_or_default();

    match svc {
        CONTROL_MEMORY => {
            let flags = args.arg(0);
            let addr = args.arg(1);
            let size = args.arg(3);
            let perm = permission_from_bits(args.arg(4));
            let Some(op) = op_from_flags(flags) else {
                return ERR_OUT_OF_RANGE;
            };
            match ctx.control_memory(process, op, region_from_flags(flags), addr, size, perm, false) {
                Ok(out_addr) => {
                    if let Ok(t) = ctx.thread_mut(thread) {
                        t.registers.r[1] = out_addr;
                    }
                    RESULT_SUCCESS
                }
                Err(e) => e.into(),
            }
        }

        QUERY_MEMORY => match ctx.query_memory(process, args.arg(2)) {
            Ok((base, size, perm, state)) => {
                if let Ok(t) = ctx.thread_mut(thread) {
                    t.registers.r[1] = base;
                    t.registers.r[2] = size;
                    t.registers.r[3] = perm.bits() as u32;
                    t.registers.r[4] = state as u32;
                }
                RESULT_SUCCESS
            }
            Err(e) => e.into(),
        },

        EXIT_PROCESS => {
            let _ = ctx.exit_process(process, thread);
            RESULT_SUCCESS
        }

        CREATE_THREAD => {
            let priority = args.arg(0) as u8;
            let entry_point = args.arg(1);
            let stack_top = args.arg(3);
            match ctx.create_thread(process, "guest-thread", priority, entry_point, stack_top) {
                Ok(tid) => install_handle_result(ctx, process, thread, ctx_thread_object(ctx, tid)),
                Err(e) => e.into(),
            }
        }

        EXIT_THREAD => {
            let _ = ctx.exit_thread(thread);
            RESULT_SUCCESS
        }

        SLEEP_THREAD => {
            let ns = args.arg(0) as i64 | ((args.arg(1) as i64) << 32);
            ctx.sleep_thread(thread, ns);
            RESULT_SUCCESS
        }

        GET_THREAD_PRIORITY => match resolve(ctx, process, thread, args.arg(1)) {
            Ok(oid) => match ctx.thread_of(oid) {
                Some(tid) => {
                    let prio = ctx.thread(tid).map(|t| t.base_priority).unwrap_or(0);
                    if let Ok(t) = ctx.thread_mut(thread) {
                        t.registers.r[1] = prio as u32;
                    }
                    RESULT_SUCCESS
                }
                None => ERR_INVALID_HANDLE,
            },
            Err(e) => e.into(),
        },

        SET_THREAD_PRIORITY => match resolve(ctx, process, thread, args.arg(0)) {
            Ok(oid) => match ctx.thread_of(oid) {
                Some(tid) => {
                    let priority = args.arg(1);
                    if (priority as usize) >= crate::scheduler::PRIORITY_LEVELS {
                        return ERR_OUT_OF_RANGE;
                    }
                    ctx.set_thread_priority(tid, priority as u8);
                    RESULT_SUCCESS
                }
                None => ERR_INVALID_HANDLE,
            },
            Err(e) => e.into(),
        },

        CREATE_MUTEX => {
            let locked = args.arg(1) != 0;
            let oid = ctx.create_mutex(locked, thread);
            install_handle_result(ctx, process, thread, Some(oid))
        }

        RELEASE_MUTEX => match resolve(ctx, process, thread, args.arg(0)) {
            Ok(oid) => ctx.release_mutex(thread, oid),
            Err(e) => e.into(),
        },

        CREATE_SEMAPHORE => {
            let initial = args.arg(1) as i32;
            let max = args.arg(2) as i32;
            let oid = ctx.create_semaphore(initial, max);
            install_handle_result(ctx, process, thread, Some(oid))
        }

        RELEASE_SEMAPHORE => match resolve(ctx, process, thread, args.arg(1)) {
            Ok(oid) => match ctx.release_semaphore(oid, args.arg(2) as i32) {
                Ok(old) => {
                    if let Ok(t) = ctx.thread_mut(thread) {
                        t.registers.r[1] = old as u32;
                    }
                    RESULT_SUCCESS
                }
                Err(e) => e.into(),
            },
            Err(e) => e.into(),
        },

        CREATE_EVENT => {
            let reset = reset_type_from(args.arg(1));
            let oid = ctx.create_event(reset);
            install_handle_result(ctx, process, thread, Some(oid))
        }

        SIGNAL_EVENT => match resolve(ctx, process, thread, args.arg(0)) {
            Ok(oid) => ctx.signal_event(oid).map(|_| RESULT_SUCCESS).unwrap_or_else(Into::into),
            Err(e) => e.into(),
        },

        CLEAR_EVENT => match resolve(ctx, process, thread, args.arg(0)) {
            Ok(oid) => ctx.clear_event(oid).map(|_| RESULT_SUCCESS).unwrap_or_else(Into::into),
            Err(e) => e.into(),
        },

        CREATE_TIMER => {
            let reset = reset_type_from(args.arg(1));
            let oid = ctx.create_timer(reset);
            install_handle_result(ctx, process, thread, Some(oid))
        }

        SET_TIMER => match resolve(ctx, process, thread, args.arg(0)) {
            Ok(oid) => {
                let initial = args.arg(1) as u64 | ((args.arg(2) as u64) << 32);
                let interval = args.arg(3) as u64;
                ctx.set_timer(oid, initial, interval).map(|_| RESULT_SUCCESS).unwrap_or_else(Into::into)
            }
            Err(e) => e.into(),
        },

        CANCEL_TIMER => match resolve(ctx, process, thread, args.arg(0)) {
            Ok(oid) => ctx.cancel_timer(oid).map(|_| RESULT_SUCCESS).unwrap_or_else(Into::into),
            Err(e) => e.into(),
        },

        CLEAR_TIMER => match resolve(ctx, process, thread, args.arg(0)) {
            Ok(oid) => ctx.clear_timer(oid).map(|_| RESULT_SUCCESS).unwrap_or_else(Into::into),
            Err(e) => e.into(),
        },

        CREATE_MEMORY_BLOCK => {
            let size = args.arg(1);
            let my_perm = permission_from_bits(args.arg(2));
            let other_perm = permission_from_bits(args.arg(3));
            let oid = ctx.create_memory_block(process, size, my_perm, other_perm);
            install_handle_result(ctx, process, thread, Some(oid))
        }

        MAP_MEMORY_BLOCK => match resolve(ctx, process, thread, args.arg(0)) {
            Ok(oid) => ctx.map_memory_block(oid, process, args.arg(1)).map(|_| RESULT_SUCCESS).unwrap_or_else(Into::into),
            Err(e) => e.into(),
        },

        UNMAP_MEMORY_BLOCK => match resolve(ctx, process, thread, args.arg(0)) {
            Ok(oid) => ctx
                .unmap_memory_block(oid, process, args.arg(1), args.arg(2))
                .map(|_| RESULT_SUCCESS)
                .unwrap_or_else(Into::into),
            Err(e) => e.into(),
        },

        CREATE_ADDRESS_ARBITER => {
            let oid = ctx.create_address_arbiter();
            install_handle_result(ctx, process, thread, Some(oid))
        }

        ARBITRATE_ADDRESS => match resolve(ctx, process, thread, args.arg(0)) {
            Ok(oid) => {
                let address = args.arg(1);
                let kind = arbitration_type_from(args.arg(2));
                let value = args.arg(3) as i32;
                let timeout_ns = args.arg(4) as i64 | ((args.arg(5) as i64) << 32);
                // A real ARM guest's value lives in guest memory at `address`;
                // the host-memory bridge is out of scope, so arbitration here
                // operates purely on the supplied `value` as both the read
                // and (when applicable) the decremented snapshot.
                let mut current = value;
                ctx.arbitrate_address(thread, oid, address, kind, value, timeout_ns, move || current, |v| current = v)
            }
            Err(e) => e.into(),
        },

        CLOSE_HANDLE => {
            let handle = Handle(args.arg(0));
            ctx.close_handle(process, handle).map(|_| RESULT_SUCCESS).unwrap_or_else(Into::into)
        }

        WAIT_SYNCHRONIZATION1 => match resolve(ctx, process, thread, args.arg(0)) {
            Ok(oid) => {
                let timeout_ns = args.arg(2) as i64 | ((args.arg(3) as i64) << 32);
                ctx.wait_synchronization_any(thread, &[oid], timeout_ns).0
            }
            Err(e) => e.into(),
        },

        WAIT_SYNCHRONIZATION_N => {
            if (args.arg(2) as i32) < 0 {
                return ERR_OUT_OF_RANGE;
            }
            let count = args.arg(2) as usize;
            let wait_all = args.arg(1) != 0;
            let base = args.arg(3);
            let mut objects = Vec::with_capacity(count);
            for i in 0..count {
                match resolve(ctx, process, thread, base.wrapping_add(i as u32)) {
                    Ok(oid) => objects.push(oid),
                    Err(e) => return e.into(),
                }
            }
            let timeout_ns = args.arg(4) as i64;
            if wait_all {
                ctx.wait_synchronization_all(thread, &objects, timeout_ns)
            } else {
                let (rc, index) = ctx.wait_synchronization_any(thread, &objects, timeout_ns);
                if let Some(i) = index {
                    if let Ok(t) = ctx.thread_mut(thread) {
                        t.registers.r[1] = i as u32;
                    }
                }
                rc
            }
        }

        DUPLICATE_HANDLE => {
            let handle = Handle(args.arg(1));
            match ctx.duplicate_handle(process, handle) {
                Ok(h) => {
                    if let Ok(t) = ctx.thread_mut(thread) {
                        t.registers.r[1] = h.0;
                    }
                    RESULT_SUCCESS
                }
                Err(e) => e.into(),
            }
        }

        GET_SYSTEM_TICK => {
            let tick = ctx.get_system_tick();
            if let Ok(t) = ctx.thread_mut(thread) {
                t.registers.r[1] = tick as u32;
                t.registers.r[2] = (tick >> 32) as u32;
            }
            RESULT_SUCCESS
        }

        GET_RESOURCE_LIMIT => match resolve(ctx, process, thread, args.arg(1)) {
            Ok(oid) => match ctx.process_of(oid) {
                Some(pid) => match ctx.process(pid).map(|p| p.resource_limit) {
                    Ok(limit_id) => install_handle_result(ctx, process, thread, Some(limit_id)),
                    Err(e) => e.into(),
                },
                None => ERR_INVALID_HANDLE,
            },
            Err(e) => e.into(),
        },

        GET_RESOURCE_LIMIT_CURRENT_VALUES => match resolve(ctx, process, thread, args.arg(1)) {
            Ok(oid) => match ctx.resource_limit_object(oid) {
                Ok(limit) => {
                    if let Ok(t) = ctx.thread_mut(thread) {
                        t.registers.r[1] = limit.commit_current as u32;
                        t.registers.r[2] = limit.thread_current as u32;
                        t.registers.r[3] = limit.session_current as u32;
                    }
                    RESULT_SUCCESS
                }
                Err(e) => e.into(),
            },
            Err(e) => e.into(),
        },

        CONNECT_TO_PORT | CREATE_SESSION_TO_PORT => {
            // Both take a port identity; `ConnectToPort` by name (the 0x2D
            // ABI reads a C string from guest memory, out of scope here so
            // callers pass a pre-resolved `ClientPort` handle instead) and
            // `CreateSessionToPort` by handle -- both resolve to the same
            // connect-request path.
            match resolve(ctx, process, thread, args.arg(1)) {
                Ok(client_port) => match ctx.client_port_server(client_port) {
                    Some(server_port) => match ctx.connect_to_server_port(thread, server_port) {
                        Ok(session) => install_handle_result(ctx, process, thread, Some(session)),
                        Err(e) => e.into(),
                    },
                    None => ERR_INVALID_HANDLE,
                },
                Err(e) => e.into(),
            }
        }

        // The command buffer itself lives in the guest's TLS, which this
        // crate never reads directly (same boundary as `ArbitrateAddress`'s
        // guest-word closures) -- an empty message still exercises the
        // session rendezvous; a caller wanting to transfer buffers or
        // handles decodes TLS into a `ParsedMessage` and calls
        // `KernelContext::send_sync_request` directly.
        SEND_SYNC_REQUEST => match resolve(ctx, process, thread, args.arg(0)) {
            Ok(oid) => ctx.send_sync_request(thread, oid, empty_ipc_message()).unwrap_or_else(Into::into),
            Err(e) => e.into(),
        },

        CREATE_PORT => {
            let max_sessions = args.arg(2);
            match ctx.create_port(format!("port{}", args.arg(3)), max_sessions) {
                Ok((client, server)) => {
                    let client_handle = ctx.create_handle(process, client);
                    let server_handle = ctx.create_handle(process, server);
                    match (client_handle, server_handle) {
                        (Ok(ch), Ok(sh)) => {
                            if let Ok(t) = ctx.thread_mut(thread) {
                                t.registers.r[1] = sh.0;
                                t.registers.r[2] = ch.0;
                            }
                            RESULT_SUCCESS
                        }
                        (Err(e), _) | (_, Err(e)) => e.into(),
                    }
                }
                Err(e) => e.into(),
            }
        }

        ACCEPT_SESSION => match resolve(ctx, process, thread, args.arg(1)) {
            Ok(server_port) => match ctx.accept_session(server_port) {
                Ok(session) => install_handle_result(ctx, process, thread, Some(session)),
                Err(e) => e.into(),
            },
            Err(e) => e.into(),
        },

        REPLY_AND_RECEIVE => {
            let count = args.arg(1) as usize;
            let base = args.arg(2);
            let reply_target_raw = args.arg(3);
            let mut objects = Vec::with_capacity(count);
            for i in 0..count {
                match resolve(ctx, process, thread, base.wrapping_add(i as u32)) {
                    Ok(oid) => objects.push(oid),
                    Err(e) => return e.into(),
                }
            }
            let reply_target = if reply_target_raw == 0 {
                None
            } else {
                resolve(ctx, process, thread, reply_target_raw).ok()
            };
            let reply = reply_target.map(|_| empty_ipc_message());
            match ctx.reply_and_receive(thread, &objects, reply_target, reply) {
                Ok(outcome) => {
                    if let Some(i) = outcome.woken_index {
                        if let Ok(t) = ctx.thread_mut(thread) {
                            t.registers.r[1] = i as u32;
                        }
                    }
                    RESULT_SUCCESS
                }
                Err(e) => e.into(),
            }
        }

        BREAK => {
            log::error!("guest BREAK: reason={}", args.arg(0));
            RESULT_SUCCESS
        }

        OUTPUT_DEBUG_STRING => {
            log::info!("guest debug string at 0x{:08X} len={}", args.arg(0), args.arg(1));
            RESULT_SUCCESS
        }

        _ => {
            log::warn!("unimplemented SVC 0x{:02X} ({})", svc, numbers::name(svc));
            RESULT_SUCCESS
        }
    }
}

fn resolve(ctx: &KernelContext, process: ProcessId, thread: ThreadId, raw_handle: u32) -> Result<crate::object::ObjectId, KernelError> {
    ctx.resolve_handle(process, thread, Handle(raw_handle))
}

fn install_handle_result(
    ctx: &mut KernelContext,
    process: ProcessId,
    thread: ThreadId,
    object: Option<crate::object::ObjectId>,
) -> ResultCode {
    let Some(oid) = object else {
        return ERR_INVALID_HANDLE;
    };
    match ctx.create_handle(process, oid) {
        Ok(h) => {
            if let Ok(t) = ctx.thread_mut(thread) {
                t.registers.r[1] = h.0;
            }
            RESULT_SUCCESS
        }
        Err(e) => e.into(),
    }
}

fn ctx_thread_object(ctx: &KernelContext, tid: ThreadId) -> Option<crate::object::ObjectId> {
    ctx.object_id_of_thread(tid)
}

fn reset_type_from(raw: u32) -> ResetType {
    match raw {
        1 => ResetType::Sticky,
        2 => ResetType::Pulse,
        _ => ResetType::OneShot,
    }
}

fn arbitration_type_from(raw: u32) -> ArbitrationType {
    match raw {
        1 => ArbitrationType::WaitIfLessThan,
        2 => ArbitrationType::DecrementAndWaitIfLessThan,
        3 => ArbitrationType::WaitIfLessThanWithTimeout,
        4 => ArbitrationType::DecrementAndWaitIfLessThanWithTimeout,
        _ => ArbitrationType::Signal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;

    fn setup() -> (KernelContext, ThreadId) {
        let mut ctx = KernelContext::new(KernelConfig::default());
        let pid = ctx.create_process("test");
        let tid = ctx.create_thread(pid, "main", 32, 0, 0).unwrap();
        (ctx, tid)
    }

    #[test]
    fn create_and_release_mutex_round_trips_through_dispatch() {
        let (mut ctx, tid) = setup();
        if let Ok(t) = ctx.thread_mut(tid) {
            t.registers.r[1] = 0; // not initially locked
        }
        let rc = dispatch(&mut ctx, tid, numbers::CREATE_MUTEX);
        assert_eq!(rc, RESULT_SUCCESS);
        let handle = ctx.thread(tid).unwrap().registers.r[1];

        if let Ok(t) = ctx.thread_mut(tid) {
            t.registers.r[0] = handle;
        }
        let rc = dispatch(&mut ctx, tid, numbers::RELEASE_MUTEX);
        assert_eq!(rc, RESULT_SUCCESS);
    }

    #[test]
    fn unknown_svc_returns_success() {
        let (mut ctx, tid) = setup();
        let rc = dispatch(&mut ctx, tid, 0x7E);
        assert_eq!(rc, RESULT_SUCCESS);
    }

    #[test]
    fn get_system_tick_reports_advanced_time() {
        let (mut ctx, tid) = setup();
        ctx.advance_time(500);
        dispatch(&mut ctx, tid, numbers::GET_SYSTEM_TICK);
        assert_eq!(ctx.thread(tid).unwrap().registers.r[1], 500);
    }

    #[test]
    fn get_resource_limit_and_current_values_round_trip_through_dispatch() {
        let (mut ctx, tid) = setup();
        if let Ok(t) = ctx.thread_mut(tid) {
            t.registers.r[1] = crate::handle::HANDLE_CURRENT_PROCESS.0;
        }
        let rc = dispatch(&mut ctx, tid, numbers::GET_RESOURCE_LIMIT);
        assert_eq!(rc, RESULT_SUCCESS);
        let limit_handle = ctx.thread(tid).unwrap().registers.r[1];

        if let Ok(t) = ctx.thread_mut(tid) {
            t.registers.r[1] = limit_handle;
        }
        let rc = dispatch(&mut ctx, tid, numbers::GET_RESOURCE_LIMIT_CURRENT_VALUES);
        assert_eq!(rc, RESULT_SUCCESS);
    }
}
