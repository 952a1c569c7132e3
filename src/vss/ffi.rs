//! Raw COM binding to `VssApi.dll`
//!
//! All unsafe code of the crate lives here. Interfaces are called through
//! their vtables; every HRESULT is checked before anything returned by the
//! call is trusted, and every string handed out by VSS is copied into an
//! owned `String` and freed immediately.

#![allow(non_snake_case, clippy::upper_case_acronyms)]

use std::cell::Cell;
use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;
use std::time::Duration;
use uuid::Uuid;
use windows_sys::core::{GUID, HRESULT};
use windows_sys::Win32::Foundation::{
    GetLastError, BOOL, ERROR_MORE_DATA, ERROR_NO_MORE_FILES, INVALID_HANDLE_VALUE, RPC_E_TOO_LATE,
};
use windows_sys::Win32::Storage::FileSystem::{
    FindFirstVolumeMountPointW, FindNextVolumeMountPointW, FindVolumeMountPointClose,
    GetVolumePathNamesForVolumeNameW,
};
use windows_sys::Win32::System::Com::{
    CoInitializeEx, CoInitializeSecurity, CoTaskMemFree, COINIT_MULTITHREADED, EOAC_STATIC_CLOAKING,
    RPC_C_AUTHN_LEVEL_PKT_INTEGRITY, RPC_C_IMP_LEVEL_IMPERSONATE,
};
use windows_sys::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

use super::binding::{BackupComponents, ComponentsFactory, ProviderProperties, SnapshotProperties};
use super::types::{
    filetime_to_datetime, hresult_name, BackupType, Context, ObjectType, E_ACCESSDENIED, S_FALSE,
    S_OK, VSS_E_OBJECT_NOT_FOUND, VSS_S_ASYNC_CANCELLED, VSS_S_ASYNC_FINISHED, VSS_S_ASYNC_PENDING,
};
use crate::error::{Error, Result};

const MAX_LONG_PATH: usize = 32768;

fn to_guid(id: Uuid) -> GUID {
    GUID::from_u128(id.as_u128())
}

fn to_uuid(g: GUID) -> Uuid {
    Uuid::from_fields(g.data1, g.data2, g.data3, &g.data4)
}

fn null_guid() -> GUID {
    GUID::from_u128(0)
}

fn guid_or_null(id: Option<Uuid>) -> GUID {
    id.map(to_guid).unwrap_or_else(null_guid)
}

#[repr(C)]
#[derive(Clone, Copy)]
struct VSS_SNAPSHOT_PROP {
    SnapshotId: GUID,
    SnapshotSetId: GUID,
    lSnapshotsCount: i32,
    pwszSnapshotDeviceObject: *mut u16,
    pwszOriginalVolumeName: *mut u16,
    pwszOriginatingMachine: *mut u16,
    pwszServiceMachine: *mut u16,
    pwszExposedName: *mut u16,
    pwszExposedPath: *mut u16,
    ProviderId: GUID,
    lSnapshotAttributes: i32,
    tsCreationTimestamp: i64,
    eStatus: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct VSS_PROVIDER_PROP {
    ProviderId: GUID,
    pwszProviderName: *mut u16,
    eProviderType: u32,
    pwszProviderVersion: *mut u16,
    ProviderVersionId: GUID,
    ClassId: GUID,
}

#[repr(C)]
#[derive(Clone, Copy)]
union VSS_OBJECT_UNION {
    Snap: VSS_SNAPSHOT_PROP,
    Prov: VSS_PROVIDER_PROP,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct VSS_OBJECT_PROP {
    Type: u32,
    Obj: VSS_OBJECT_UNION,
}

type Unused = usize;

#[repr(C)]
struct IUnknownVtbl {
    QueryInterface: Unused,
    AddRef: Unused,
    Release: unsafe extern "system" fn(*mut c_void) -> u32,
}

#[repr(C)]
struct IVssAsyncVtbl {
    base: IUnknownVtbl,
    Cancel: unsafe extern "system" fn(*mut IVssAsync) -> HRESULT,
    Wait: unsafe extern "system" fn(*mut IVssAsync, u32) -> HRESULT,
    QueryStatus: unsafe extern "system" fn(*mut IVssAsync, *mut HRESULT, *mut i32) -> HRESULT,
}

#[repr(C)]
struct IVssAsync {
    vtbl: *const IVssAsyncVtbl,
}

#[repr(C)]
struct IVssEnumObjectVtbl {
    base: IUnknownVtbl,
    Next: unsafe extern "system" fn(*mut IVssEnumObject, u32, *mut VSS_OBJECT_PROP, *mut u32) -> HRESULT,
    Skip: Unused,
    Reset: Unused,
    Clone: Unused,
}

#[repr(C)]
struct IVssEnumObject {
    vtbl: *const IVssEnumObjectVtbl,
}

type AsyncCall = unsafe extern "system" fn(*mut IVssBackupComponents, *mut *mut IVssAsync) -> HRESULT;
type PlainCall = unsafe extern "system" fn(*mut IVssBackupComponents) -> HRESULT;

#[repr(C)]
struct IVssBackupComponentsVtbl {
    base: IUnknownVtbl,
    GetWriterComponentsCount: Unused,
    GetWriterComponents: Unused,
    InitializeForBackup: unsafe extern "system" fn(*mut IVssBackupComponents, *mut u16) -> HRESULT,
    SetBackupState: unsafe extern "system" fn(*mut IVssBackupComponents, bool, bool, u32, bool) -> HRESULT,
    InitializeForRestore: Unused,
    SetRestoreState: Unused,
    GatherWriterMetadata: AsyncCall,
    GetWriterMetadataCount: Unused,
    GetWriterMetadata: Unused,
    FreeWriterMetadata: PlainCall,
    AddComponent: Unused,
    PrepareForBackup: AsyncCall,
    AbortBackup: PlainCall,
    GatherWriterStatus: AsyncCall,
    GetWriterStatusCount: Unused,
    FreeWriterStatus: PlainCall,
    GetWriterStatus: Unused,
    SetBackupSucceeded: Unused,
    SetBackupOptions: Unused,
    SetSelectedForRestore: Unused,
    SetRestoreOptions: Unused,
    SetAdditionalRestores: Unused,
    SetPreviousBackupStamp: Unused,
    SaveAsXML: Unused,
    BackupComplete: AsyncCall,
    AddAlternativeLocationMapping: Unused,
    AddRestoreSubcomponent: Unused,
    SetFileRestoreStatus: Unused,
    AddNewTarget: Unused,
    SetRangesFilePath: Unused,
    PreRestore: Unused,
    PostRestore: Unused,
    SetContext: unsafe extern "system" fn(*mut IVssBackupComponents, i32) -> HRESULT,
    StartSnapshotSet: unsafe extern "system" fn(*mut IVssBackupComponents, *mut GUID) -> HRESULT,
    AddToSnapshotSet:
        unsafe extern "system" fn(*mut IVssBackupComponents, *const u16, GUID, *mut GUID) -> HRESULT,
    DoSnapshotSet: AsyncCall,
    DeleteSnapshots: unsafe extern "system" fn(
        *mut IVssBackupComponents,
        GUID,
        u32,
        BOOL,
        *mut i32,
        *mut GUID,
    ) -> HRESULT,
    ImportSnapshots: Unused,
    BreakSnapshotSet: Unused,
    GetSnapshotProperties:
        unsafe extern "system" fn(*mut IVssBackupComponents, GUID, *mut VSS_SNAPSHOT_PROP) -> HRESULT,
    Query: unsafe extern "system" fn(
        *mut IVssBackupComponents,
        GUID,
        u32,
        u32,
        *mut *mut IVssEnumObject,
    ) -> HRESULT,
    IsVolumeSupported:
        unsafe extern "system" fn(*mut IVssBackupComponents, GUID, *const u16, *mut BOOL) -> HRESULT,
}

#[repr(C)]
struct IVssBackupComponents {
    vtbl: *const IVssBackupComponentsVtbl,
}

type CreateComponentsFn = unsafe extern "system" fn(*mut *mut IVssBackupComponents) -> HRESULT;
type FreePropertiesFn = unsafe extern "system" fn(*mut VSS_SNAPSHOT_PROP);
type ExportFn = unsafe extern "system" fn() -> isize;

fn check(call: &str, hr: HRESULT) -> Result<()> {
    if hr == S_OK as HRESULT {
        Ok(())
    } else {
        Err(native_error(call, hr))
    }
}

fn native_error(call: &str, hr: HRESULT) -> Error {
    Error::Native {
        call: call.to_string(),
        name: hresult_name(hr as u32),
        code: hr as u32,
    }
}

fn to_wide(s: &str) -> Vec<u16> {
    std::ffi::OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// Copy a NUL-terminated UTF-16 string
///
/// # Safety
/// `p` must be null or point to a NUL-terminated UTF-16 string.
unsafe fn from_wide_ptr(p: *const u16) -> String {
    if p.is_null() {
        return String::new();
    }
    let mut len = 0;
    while *p.add(len) != 0 {
        len += 1;
    }
    String::from_utf16_lossy(std::slice::from_raw_parts(p, len))
}

fn from_wide_buffer(buffer: &[u16]) -> String {
    let len = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    String::from_utf16_lossy(&buffer[..len])
}

thread_local! {
    static COM_INITIALIZED: Cell<bool> = const { Cell::new(false) };
}

static COM_SECURITY: OnceLock<HRESULT> = OnceLock::new();

/// Initialize COM for the calling thread, and COM security for the process
fn ensure_com() -> Result<()> {
    if !COM_INITIALIZED.with(Cell::get) {
        // S_FALSE: already initialized on this thread
        let hr = unsafe { CoInitializeEx(ptr::null(), COINIT_MULTITHREADED) };
        if hr != S_OK as HRESULT && hr != S_FALSE as HRESULT {
            return Err(native_error("CoInitializeEx()", hr));
        }
        COM_INITIALIZED.with(|c| c.set(true));
    }

    let hr = *COM_SECURITY.get_or_init(|| unsafe {
        CoInitializeSecurity(
            ptr::null_mut(),
            -1,
            ptr::null(),
            ptr::null(),
            RPC_C_AUTHN_LEVEL_PKT_INTEGRITY,
            RPC_C_IMP_LEVEL_IMPERSONATE,
            ptr::null(),
            EOAC_STATIC_CLOAKING,
            ptr::null(),
        )
    });
    if hr != S_OK as HRESULT && hr != RPC_E_TOO_LATE {
        return Err(native_error("CoInitializeSecurity()", hr));
    }

    Ok(())
}

/// Entry points resolved from `VssApi.dll`
#[derive(Clone, Copy)]
pub struct ComFactory {
    create: CreateComponentsFn,
    free_properties: FreePropertiesFn,
}

impl ComFactory {
    pub fn new() -> Result<Self> {
        ensure_com()?;

        let name = to_wide("VssApi.dll");
        let module = unsafe { LoadLibraryW(name.as_ptr()) };
        if module == 0 {
            return Err(Error::Unsupported(format!(
                "could not load VssApi.dll (error {})",
                unsafe { GetLastError() }
            )));
        }

        let create = unsafe { GetProcAddress(module, b"CreateVssBackupComponentsInternal\0".as_ptr()) };
        let free = unsafe { GetProcAddress(module, b"VssFreeSnapshotPropertiesInternal\0".as_ptr()) };
        let (Some(create), Some(free)) = (create, free) else {
            return Err(Error::Unsupported("VssApi.dll is missing required entry points".into()));
        };

        // SAFETY: both exports have exactly these signatures
        unsafe {
            Ok(ComFactory {
                create: std::mem::transmute::<ExportFn, CreateComponentsFn>(create),
                free_properties: std::mem::transmute::<ExportFn, FreePropertiesFn>(free),
            })
        }
    }
}

impl ComponentsFactory for ComFactory {
    type Components = ComComponents;

    fn create(&self) -> Result<ComComponents> {
        ensure_com()?;

        let mut raw: *mut IVssBackupComponents = ptr::null_mut();
        let hr = unsafe { (self.create)(&mut raw) };

        if hr == E_ACCESSDENIED as HRESULT {
            if let Some(p) = NonNull::new(raw) {
                unsafe { release(p.as_ptr() as *mut c_void) };
            }
            return Err(Error::Native {
                call: "CreateVssBackupComponents() (backup privileges required)".into(),
                name: hresult_name(hr as u32),
                code: hr as u32,
            });
        }
        check("CreateVssBackupComponents()", hr)?;

        let ptr = NonNull::new(raw)
            .ok_or_else(|| Error::Internal("CreateVssBackupComponents() returned null".into()))?;

        Ok(ComComponents {
            ptr,
            free_properties: self.free_properties,
        })
    }

    fn volume_path_names(&self, volume_guid_path: &str) -> Result<Vec<String>> {
        let volume = to_wide(volume_guid_path);
        let mut buffer = vec![0u16; MAX_LONG_PATH];
        let mut required = 0u32;

        let mut ok = unsafe {
            GetVolumePathNamesForVolumeNameW(
                volume.as_ptr(),
                buffer.as_mut_ptr(),
                buffer.len() as u32,
                &mut required,
            )
        };
        if ok == 0 && unsafe { GetLastError() } == ERROR_MORE_DATA {
            buffer = vec![0u16; required as usize];
            ok = unsafe {
                GetVolumePathNamesForVolumeNameW(
                    volume.as_ptr(),
                    buffer.as_mut_ptr(),
                    buffer.len() as u32,
                    &mut required,
                )
            };
        }
        if ok == 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }

        let mut result: Vec<String> = buffer
            .split(|&c| c == 0)
            .take_while(|name| !name.is_empty())
            .map(|name| {
                let name = String::from_utf16_lossy(name);
                if name.ends_with('\\') {
                    name
                } else {
                    name + "\\"
                }
            })
            .collect();
        result.sort();

        Ok(result)
    }

    fn mounted_folders(&self, volume: &str) -> Result<Vec<String>> {
        let root = format!("{}\\", volume.trim_end_matches('\\'));
        let root_wide = to_wide(&root);
        let mut buffer = vec![0u16; MAX_LONG_PATH];
        let mut result = Vec::new();

        let handle = unsafe {
            FindFirstVolumeMountPointW(root_wide.as_ptr(), buffer.as_mut_ptr(), buffer.len() as u32)
        };
        if handle == INVALID_HANDLE_VALUE {
            return match unsafe { GetLastError() } {
                ERROR_NO_MORE_FILES => Ok(result),
                _ => Err(Error::Io(std::io::Error::last_os_error())),
            };
        }

        let outcome = loop {
            let relative = from_wide_buffer(&buffer);
            result.push(format!("{}{}", root, relative.trim_end_matches('\\')) + "\\");

            let more = unsafe {
                FindNextVolumeMountPointW(handle, buffer.as_mut_ptr(), buffer.len() as u32)
            };
            if more == 0 {
                break match unsafe { GetLastError() } {
                    ERROR_NO_MORE_FILES => Ok(()),
                    _ => Err(Error::Io(std::io::Error::last_os_error())),
                };
            }
        };

        unsafe { FindVolumeMountPointClose(handle) };
        outcome.map(|_| result)
    }
}

/// # Safety
/// `p` must be a live COM interface pointer owned by the caller.
unsafe fn release(p: *mut c_void) {
    let vtbl = *(p as *const *const IUnknownVtbl);
    ((*vtbl).Release)(p);
}

/// An owned `IVssBackupComponents` pointer
pub struct ComComponents {
    ptr: NonNull<IVssBackupComponents>,
    free_properties: FreePropertiesFn,
}

// The object is created in the multithreaded apartment and only ever used
// by one thread at a time (it is owned, or behind a mutex).
unsafe impl Send for ComComponents {}

impl ComComponents {
    fn this(&self) -> *mut IVssBackupComponents {
        self.ptr.as_ptr()
    }

    fn vtbl(&self) -> &IVssBackupComponentsVtbl {
        // SAFETY: ptr is a live IVssBackupComponents for as long as self exists
        unsafe { &*(*self.this()).vtbl }
    }

    fn plain(&mut self, call: &str, f: PlainCall) -> Result<()> {
        check(call, unsafe { f(self.this()) })
    }

    /// Start an asynchronous call and wait up to `timeout` for it
    fn call_and_wait(&mut self, call: &str, f: AsyncCall, timeout: Duration) -> Result<()> {
        let mut raw: *mut IVssAsync = ptr::null_mut();
        check(call, unsafe { f(self.this(), &mut raw) })?;
        let async_op =
            NonNull::new(raw).ok_or_else(|| Error::Internal(format!("{} returned no async handle", call)))?;

        let result = unsafe { wait_async(call, async_op.as_ptr(), timeout) };
        unsafe { release(async_op.as_ptr() as *mut c_void) };
        result
    }

    /// Copy the properties out and free the VSS-owned strings
    fn take_snapshot_properties(&self, raw: &mut VSS_SNAPSHOT_PROP) -> SnapshotProperties {
        let props = unsafe {
            SnapshotProperties {
                snapshot_id: to_uuid(raw.SnapshotId),
                snapshot_set_id: to_uuid(raw.SnapshotSetId),
                snapshots_count: raw.lSnapshotsCount.max(0) as u32,
                device_object: from_wide_ptr(raw.pwszSnapshotDeviceObject),
                original_volume: from_wide_ptr(raw.pwszOriginalVolumeName),
                provider_id: to_uuid(raw.ProviderId),
                attributes: raw.lSnapshotAttributes as u32,
                creation_time: filetime_to_datetime(raw.tsCreationTimestamp as u64),
                state: raw.eStatus,
            }
        };
        unsafe { (self.free_properties)(raw) };
        props
    }

    fn query(&mut self, object_type: ObjectType) -> Result<Vec<VSS_OBJECT_PROP>> {
        let call = format!("Query({})", object_type);
        let mut raw_enum: *mut IVssEnumObject = ptr::null_mut();
        let hr = unsafe {
            (self.vtbl().Query)(
                self.this(),
                null_guid(),
                ObjectType::None.raw(),
                object_type.raw(),
                &mut raw_enum,
            )
        };
        if hr != S_OK as HRESULT && hr != S_FALSE as HRESULT {
            return Err(native_error(&call, hr));
        }
        let Some(enumerator) = NonNull::new(raw_enum) else {
            return Ok(Vec::new());
        };

        let mut result = Vec::new();
        let outcome = loop {
            // SAFETY: all-zero is a valid VSS_OBJECT_PROP (null pointers, zero ids)
            let mut prop: VSS_OBJECT_PROP = unsafe { std::mem::zeroed() };
            let mut fetched = 0u32;
            let hr = unsafe {
                ((*(*enumerator.as_ptr()).vtbl).Next)(enumerator.as_ptr(), 1, &mut prop, &mut fetched)
            };
            if hr != S_OK as HRESULT && hr != S_FALSE as HRESULT {
                break Err(native_error("Next()", hr));
            }
            if fetched == 0 {
                break Ok(());
            }
            result.push(prop);
        };

        unsafe { release(enumerator.as_ptr() as *mut c_void) };
        outcome.map(|_| result)
    }
}

/// # Safety
/// `op` must be a live `IVssAsync` pointer.
unsafe fn wait_async(call: &str, op: *mut IVssAsync, timeout: Duration) -> Result<()> {
    let vtbl = &*(*op).vtbl;
    let millis = timeout.as_millis().min(u32::MAX as u128 - 1) as u32;

    let hr = (vtbl.Wait)(op, millis);
    if hr != S_OK as HRESULT {
        (vtbl.Cancel)(op);
        return Err(native_error(&format!("{} Wait()", call), hr));
    }

    let mut status: HRESULT = 0;
    let hr = (vtbl.QueryStatus)(op, &mut status, ptr::null_mut());
    if hr != S_OK as HRESULT {
        (vtbl.Cancel)(op);
        return Err(native_error(&format!("{} QueryStatus()", call), hr));
    }

    match status as u32 {
        VSS_S_ASYNC_FINISHED => Ok(()),
        VSS_S_ASYNC_PENDING => {
            (vtbl.Cancel)(op);
            Err(Error::Timeout(call.to_string()))
        }
        VSS_S_ASYNC_CANCELLED => Err(Error::Internal(format!("{}: async operation cancelled", call))),
        _ => Err(native_error(call, status)),
    }
}

impl Drop for ComComponents {
    fn drop(&mut self) {
        unsafe { release(self.this() as *mut c_void) };
    }
}

impl BackupComponents for ComComponents {
    fn initialize_for_backup(&mut self) -> Result<()> {
        let f = self.vtbl().InitializeForBackup;
        check("InitializeForBackup()", unsafe { f(self.this(), ptr::null_mut()) })
    }

    fn set_context(&mut self, context: Context) -> Result<()> {
        let f = self.vtbl().SetContext;
        check("SetContext()", unsafe { f(self.this(), context.raw() as i32) })
    }

    fn set_backup_state(
        &mut self,
        select_components: bool,
        bootable_system_state: bool,
        backup_type: BackupType,
        partial_file_support: bool,
    ) -> Result<()> {
        let f = self.vtbl().SetBackupState;
        check("SetBackupState()", unsafe {
            f(
                self.this(),
                select_components,
                bootable_system_state,
                backup_type.raw(),
                partial_file_support,
            )
        })
    }

    fn gather_writer_metadata(&mut self, timeout: Duration) -> Result<()> {
        let f = self.vtbl().GatherWriterMetadata;
        self.call_and_wait("GatherWriterMetadata()", f, timeout)
    }

    fn free_writer_metadata(&mut self) -> Result<()> {
        let f = self.vtbl().FreeWriterMetadata;
        self.plain("FreeWriterMetadata()", f)
    }

    fn is_volume_supported(&mut self, provider: Option<Uuid>, volume: &str) -> Result<bool> {
        let f = self.vtbl().IsVolumeSupported;
        let name = to_wide(volume);
        let mut supported: BOOL = 0;
        check("IsVolumeSupported()", unsafe {
            f(self.this(), guid_or_null(provider), name.as_ptr(), &mut supported)
        })?;
        Ok(supported != 0)
    }

    fn start_snapshot_set(&mut self) -> Result<Uuid> {
        let f = self.vtbl().StartSnapshotSet;
        let mut id = null_guid();
        check("StartSnapshotSet()", unsafe { f(self.this(), &mut id) })?;
        Ok(to_uuid(id))
    }

    fn add_to_snapshot_set(&mut self, volume: &str, provider: Option<Uuid>) -> Result<Uuid> {
        let f = self.vtbl().AddToSnapshotSet;
        let name = to_wide(volume);
        let mut id = null_guid();
        check("AddToSnapshotSet()", unsafe {
            f(self.this(), name.as_ptr(), guid_or_null(provider), &mut id)
        })?;
        Ok(to_uuid(id))
    }

    fn prepare_for_backup(&mut self, timeout: Duration) -> Result<()> {
        let f = self.vtbl().PrepareForBackup;
        self.call_and_wait("PrepareForBackup()", f, timeout)
    }

    fn gather_writer_status(&mut self, timeout: Duration) -> Result<()> {
        let f = self.vtbl().GatherWriterStatus;
        self.call_and_wait("GatherWriterStatus()", f, timeout)
    }

    fn free_writer_status(&mut self) -> Result<()> {
        let f = self.vtbl().FreeWriterStatus;
        self.plain("FreeWriterStatus()", f)
    }

    fn do_snapshot_set(&mut self, timeout: Duration) -> Result<()> {
        let f = self.vtbl().DoSnapshotSet;
        self.call_and_wait("DoSnapshotSet()", f, timeout)
    }

    fn get_snapshot_properties(&mut self, snapshot_id: Uuid) -> Result<SnapshotProperties> {
        let f = self.vtbl().GetSnapshotProperties;
        // SAFETY: all-zero is a valid VSS_SNAPSHOT_PROP
        let mut raw: VSS_SNAPSHOT_PROP = unsafe { std::mem::zeroed() };
        check("GetSnapshotProperties()", unsafe {
            f(self.this(), to_guid(snapshot_id), &mut raw)
        })?;
        Ok(self.take_snapshot_properties(&mut raw))
    }

    fn backup_complete(&mut self, timeout: Duration) -> Result<()> {
        let f = self.vtbl().BackupComplete;
        self.call_and_wait("BackupComplete()", f, timeout)
    }

    fn abort_backup(&mut self) -> Result<()> {
        let f = self.vtbl().AbortBackup;
        self.plain("AbortBackup()", f)
    }

    fn delete_snapshots(&mut self, object_type: ObjectType, id: Uuid, force: bool) -> Result<u32> {
        let f = self.vtbl().DeleteSnapshots;
        let mut deleted: i32 = 0;
        let mut non_deleted = null_guid();
        let hr = unsafe {
            f(
                self.this(),
                to_guid(id),
                object_type.raw(),
                force as BOOL,
                &mut deleted,
                &mut non_deleted,
            )
        };

        if hr as u32 == VSS_E_OBJECT_NOT_FOUND {
            return Ok(0);
        }
        check("DeleteSnapshots()", hr)?;
        Ok(deleted.max(0) as u32)
    }

    fn query_providers(&mut self) -> Result<Vec<ProviderProperties>> {
        let props = self.query(ObjectType::Provider)?;

        Ok(props
            .into_iter()
            .map(|p| unsafe {
                let prov = p.Obj.Prov;
                let result = ProviderProperties {
                    id: to_uuid(prov.ProviderId),
                    name: from_wide_ptr(prov.pwszProviderName),
                    version: from_wide_ptr(prov.pwszProviderVersion),
                    provider_type: prov.eProviderType,
                };
                CoTaskMemFree(prov.pwszProviderName as *const c_void);
                CoTaskMemFree(prov.pwszProviderVersion as *const c_void);
                result
            })
            .collect())
    }

    fn query_snapshots(&mut self) -> Result<Vec<SnapshotProperties>> {
        let props = self.query(ObjectType::Snapshot)?;

        Ok(props
            .into_iter()
            .map(|p| {
                let mut snap = unsafe { p.Obj.Snap };
                self.take_snapshot_properties(&mut snap)
            })
            .collect())
    }
}
