//! SVC numbers the dispatcher recognizes, plus a name table for logging
//! unimplemented calls.

pub const CONTROL_MEMORY: u32 = 0x01;
pub const QUERY_MEMORY: u32 = 0x02;
pub const EXIT_PROCESS: u32 = 0x03;
pub const CREATE_THREAD: u32 = 0x08;
pub const EXIT_THREAD: u32 = 0x09;
pub const SLEEP_THREAD: u32 = 0x0A;
pub const GET_THREAD_PRIORITY: u32 = 0x0B;
pub const SET_THREAD_PRIORITY: u32 = 0x0C;
pub const CREATE_MUTEX: u32 = 0x13;
pub const RELEASE_MUTEX: u32 = 0x14;
pub const CREATE_SEMAPHORE: u32 = 0x15;
pub const RELEASE_SEMAPHORE: u32 = 0x16;
pub const CREATE_EVENT: u32 = 0x17;
pub const SIGNAL_EVENT: u32 = 0x18;
pub const CLEAR_EVENT: u32 = 0x19;
pub const CREATE_TIMER: u32 = 0x1A;
pub const SET_TIMER: u32 = 0x1B;
pub const CANCEL_TIMER: u32 = 0x1C;
pub const CLEAR_TIMER: u32 = 0x1D;
pub const CREATE_MEMORY_BLOCK: u32 = 0x1E;
pub const MAP_MEMORY_BLOCK: u32 = 0x1F;
pub const UNMAP_MEMORY_BLOCK: u32 = 0x20;
pub const CREATE_ADDRESS_ARBITER: u32 = 0x21;
pub const ARBITRATE_ADDRESS: u32 = 0x22;
pub const CLOSE_HANDLE: u32 = 0x23;
pub const WAIT_SYNCHRONIZATION1: u32 = 0x24;
pub const WAIT_SYNCHRONIZATION_N: u32 = 0x25;
pub const DUPLICATE_HANDLE: u32 = 0x27;
pub const GET_SYSTEM_TICK: u32 = 0x28;
pub const GET_SYSTEM_INFO: u32 = 0x2A;
pub const GET_PROCESS_INFO: u32 = 0x2B;
pub const CONNECT_TO_PORT: u32 = 0x2D;
pub const SEND_SYNC_REQUEST: u32 = 0x32;
pub const GET_RESOURCE_LIMIT: u32 = 0x38;
pub const GET_RESOURCE_LIMIT_CURRENT_VALUES: u32 = 0x3A;
pub const CREATE_PORT: u32 = 0x47;
pub const CREATE_SESSION_TO_PORT: u32 = 0x48;
pub const CREATE_SESSION: u32 = 0x49;
pub const ACCEPT_SESSION: u32 = 0x4A;
pub const REPLY_AND_RECEIVE: u32 = 0x4F;
pub const BREAK: u32 = 0x3C;
pub const OUTPUT_DEBUG_STRING: u32 = 0x3D;

/// Highest SVC number the dispatch table reserves a slot for.
pub const TABLE_SIZE: usize = 128;

pub fn name(svc: u32) -> &'static str {
    match svc {
        CONTROL_MEMORY => "ControlMemory",
        QUERY_MEMORY => "QueryMemory",
        EXIT_PROCESS => "ExitProcess",
        CREATE_THREAD => "CreateThread",
        EXIT_THREAD => "ExitThread",
        SLEEP_THREAD => "SleepThread",
        GET_THREAD_PRIORITY => "GetThreadPriority",
        SET_THREAD_PRIORITY => "SetThreadPriority",
        CREATE_MUTEX => "CreateMutex",
        RELEASE_MUTEX => "ReleaseMutex",
        CREATE_SEMAPHORE => "CreateSemaphore",
        RELEASE_SEMAPHORE => "ReleaseSemaphore",
        CREATE_EVENT => "CreateEvent",
        SIGNAL_EVENT => "SignalEvent",
        CLEAR_EVENT => "ClearEvent",
        CREATE_TIMER => "CreateTimer",
        SET_TIMER => "SetTimer",
        CANCEL_TIMER => "CancelTimer",
        CLEAR_TIMER => "ClearTimer",
        CREATE_MEMORY_BLOCK => "CreateMemoryBlock",
        MAP_MEMORY_BLOCK => "MapMemoryBlock",
        UNMAP_MEMORY_BLOCK => "UnmapMemoryBlock",
        CREATE_ADDRESS_ARBITER => "CreateAddressArbiter",
        ARBITRATE_ADDRESS => "ArbitrateAddress",
        CLOSE_HANDLE => "CloseHandle",
        WAIT_SYNCHRONIZATION1 => "WaitSynchronization1",
        WAIT_SYNCHRONIZATION_N => "WaitSynchronizationN",
        DUPLICATE_HANDLE => "DuplicateHandle",
        GET_SYSTEM_TICK => "GetSystemTick",
        GET_SYSTEM_INFO => "GetSystemInfo",
        GET_PROCESS_INFO => "GetProcessInfo",
        CONNECT_TO_PORT => "ConnectToPort",
        SEND_SYNC_REQUEST => "SendSyncRequest",
        GET_RESOURCE_LIMIT => "GetResourceLimit",
        GET_RESOURCE_LIMIT_CURRENT_VALUES => "GetResourceLimitCurrentValues",
        CREATE_PORT => "CreatePort",
        CREATE_SESSION_TO_PORT => "CreateSessionToPort",
        CREATE_SESSION => "CreateSession",
        ACCEPT_SESSION => "AcceptSession",
        REPLY_AND_RECEIVE => "ReplyAndReceive",
        BREAK => "Break",
        OUTPUT_DEBUG_STRING => "OutputDebugString",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_size_covers_every_known_number() {
        assert!((WAIT_SYNCHRONIZATION_N as usize) < TABLE_SIZE);
        assert!((REPLY_AND_RECEIVE as usize) < TABLE_SIZE);
    }

    #[test]
    fn unknown_number_has_a_name() {
        assert_eq!(name(0x7F), "Unknown");
    }
}
