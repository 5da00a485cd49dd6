// attach.rs — Process Attachment (§4.1).
//
// Opens a read-only handle to a target process picked by name or PID, and
// enumerates its committed/readable memory regions. Every read crosses a
// process boundary via `ReadProcessMemory` and is validated against
// `VirtualQueryEx`-reported region state before it's trusted.
//
// Only PROCESS_QUERY_INFORMATION and PROCESS_VM_READ are ever requested —
// never write, thread-manipulation, or debug rights (§4.1, §1 non-goals).

use crate::source::{MemorySource, Prot, ReadError, Region, State};
use crate::types::Address;
use std::ffi::OsString;
use std::fmt;
use std::os::windows::ffi::OsStringExt;

use winapi::shared::minwindef::{DWORD, FALSE};
use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::memoryapi::{ReadProcessMemory, VirtualQueryEx};
use winapi::um::processthreadsapi::OpenProcess;
use winapi::um::tlhelp32::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
    TH32CS_SNAPPROCESS,
};
use winapi::um::winnt::{
    HANDLE, MEMORY_BASIC_INFORMATION, MEM_COMMIT, MEM_FREE, MEM_RESERVE, PAGE_EXECUTE,
    PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, PAGE_EXECUTE_WRITECOPY, PAGE_GUARD, PAGE_NOACCESS,
    PAGE_READONLY, PAGE_READWRITE, PAGE_WRITECOPY, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
};

/// How the caller identifies the target process (§4.1).
#[derive(Debug, Clone)]
pub enum ProcessSelector {
    /// Case-insensitive substring match against the executable name.
    NameContains(String),
    /// Explicit process ID, bypassing name matching entirely.
    Pid(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachError {
    TargetNotFound,
    AccessDenied,
    /// More than one process matched `NameContains` and no PID tiebreak was
    /// supplied. Carries the matching PIDs for the caller to disambiguate.
    MultipleCandidates(Vec<u32>),
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachError::TargetNotFound => write!(f, "no matching process found"),
            AttachError::AccessDenied => write!(f, "access denied opening target process"),
            AttachError::MultipleCandidates(pids) => {
                write!(f, "multiple candidate processes matched: {pids:?}")
            }
        }
    }
}
impl std::error::Error for AttachError {}

/// A read-only handle to the target process. Shared immutably across
/// reader threads (§4.1 "Concurrency"): the only interior mutability here is
/// the OS handle itself, which `ReadProcessMemory`/`VirtualQueryEx` treat as
/// thread-safe.
pub struct ProcessHandle {
    raw: HANDLE,
    pub pid: u32,
    pub process_name: String,
}

// Safety: `raw` is a read-only HANDLE used only with OS calls documented as
// safe for concurrent use from multiple threads (VirtualQueryEx,
// ReadProcessMemory). No interior mutable state is exposed.
unsafe impl Send for ProcessHandle {}
unsafe impl Sync for ProcessHandle {}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.raw);
        }
    }
}

fn wide_to_string(buf: &[u16]) -> String {
    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    OsString::from_wide(&buf[..len]).to_string_lossy().into_owned()
}

struct Candidate {
    pid: u32,
    name: String,
}

fn snapshot_processes() -> Vec<Candidate> {
    let mut out = Vec::new();
    unsafe {
        let snap = CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0);
        if snap == INVALID_HANDLE_VALUE {
            return out;
        }
        let mut entry: PROCESSENTRY32W = std::mem::zeroed();
        entry.dwSize = std::mem::size_of::<PROCESSENTRY32W>() as u32;
        if Process32FirstW(snap, &mut entry) != 0 {
            loop {
                out.push(Candidate {
                    pid: entry.th32ProcessID,
                    name: wide_to_string(&entry.szExeFile),
                });
                if Process32NextW(snap, &mut entry) == 0 {
                    break;
                }
            }
        }
        CloseHandle(snap);
    }
    out
}

/// Open a read-only handle to the target process (§4.1 `attach`).
pub fn attach(selector: &ProcessSelector) -> Result<ProcessHandle, AttachError> {
    let (pid, name) = match selector {
        ProcessSelector::Pid(pid) => {
            let procs = snapshot_processes();
            let name = procs
                .iter()
                .find(|c| c.pid == *pid)
                .map(|c| c.name.clone())
                .unwrap_or_default();
            (*pid, name)
        }
        ProcessSelector::NameContains(needle) => {
            let needle_lower = needle.to_lowercase();
            let procs = snapshot_processes();
            let matches: Vec<&Candidate> = procs
                .iter()
                .filter(|c| c.name.to_lowercase().contains(&needle_lower))
                .collect();
            match matches.as_slice() {
                [] => return Err(AttachError::TargetNotFound),
                [only] => (only.pid, only.name.clone()),
                many => {
                    return Err(AttachError::MultipleCandidates(
                        many.iter().map(|c| c.pid).collect(),
                    ))
                }
            }
        }
    };

    if pid == 0 {
        return Err(AttachError::TargetNotFound);
    }

    let raw = unsafe {
        OpenProcess(
            PROCESS_QUERY_INFORMATION | PROCESS_VM_READ,
            FALSE,
            pid as DWORD,
        )
    };
    if raw.is_null() {
        let err = unsafe { GetLastError() };
        return Err(match err {
            5 /* ERROR_ACCESS_DENIED */ => AttachError::AccessDenied,
            87 /* ERROR_INVALID_PARAMETER: pid gone */ => AttachError::TargetNotFound,
            _ => AttachError::AccessDenied,
        });
    }

    Ok(ProcessHandle {
        raw,
        pid,
        process_name: name,
    })
}

fn readable_mask() -> DWORD {
    PAGE_READONLY
        | PAGE_READWRITE
        | PAGE_WRITECOPY
        | PAGE_EXECUTE_READ
        | PAGE_EXECUTE_READWRITE
        | PAGE_EXECUTE_WRITECOPY
}

fn decode_prot(protect: DWORD) -> Prot {
    let readable = protect & readable_mask() != 0 && protect & PAGE_NOACCESS == 0;
    let writable = protect
        & (PAGE_READWRITE | PAGE_WRITECOPY | PAGE_EXECUTE_READWRITE | PAGE_EXECUTE_WRITECOPY)
        != 0;
    let executable = protect
        & (PAGE_EXECUTE
            | PAGE_EXECUTE_READ
            | PAGE_EXECUTE_READWRITE
            | PAGE_EXECUTE_WRITECOPY)
        != 0;
    let guard = protect & PAGE_GUARD != 0;
    Prot { readable, writable, executable, guard }
}

fn decode_state(state: DWORD) -> State {
    match state {
        MEM_COMMIT => State::Committed,
        MEM_RESERVE => State::Reserved,
        MEM_FREE => State::Free,
        _ => State::Free,
    }
}

/// User-mode address ceiling. A real implementation would ask
/// `GetSystemInfo`/WOW64 status for the exact value; this constant is the
/// conservative cross-bitness bound used to stop `VirtualQueryEx` walks
/// from wandering into kernel-reserved ranges.
const USER_SPACE_LIMIT: u64 = 0x0000_7FFF_FFFE_FFFF;

impl MemorySource for ProcessHandle {
    fn enumerate_regions(&self) -> Vec<Region> {
        let mut regions = Vec::new();
        let mut addr: u64 = 0;
        loop {
            if addr >= USER_SPACE_LIMIT {
                break;
            }
            let mut mbi: MEMORY_BASIC_INFORMATION = unsafe { std::mem::zeroed() };
            let written = unsafe {
                VirtualQueryEx(
                    self.raw,
                    addr as *const _,
                    &mut mbi,
                    std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };
            if written == 0 {
                break;
            }
            let base = mbi.BaseAddress as u64;
            let size = mbi.RegionSize as u64;
            if size == 0 {
                break;
            }
            regions.push(Region {
                base,
                size,
                protection: decode_prot(mbi.Protect),
                state: decode_state(mbi.State),
            });
            let next = base.saturating_add(size);
            if next <= addr {
                break;
            }
            addr = next;
        }
        regions
    }

    fn read(&self, addr: Address, len: usize) -> Result<Vec<u8>, ReadError> {
        let mut buf = vec![0u8; len];
        let mut read_bytes: usize = 0;
        let ok = unsafe {
            ReadProcessMemory(
                self.raw,
                addr as *const _,
                buf.as_mut_ptr() as *mut _,
                len,
                &mut read_bytes,
            )
        };
        if ok == 0 {
            let err = unsafe { GetLastError() };
            return Err(ReadError::Faulted(format!("ReadProcessMemory failed: {err}")));
        }
        if read_bytes < len {
            return Err(ReadError::NotReadable);
        }
        Ok(buf)
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("process_name", &self.process_name)
            .finish()
    }
}
