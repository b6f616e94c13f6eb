use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Security::{GetTokenInformation, TokenElevation, TOKEN_ELEVATION, TOKEN_QUERY};
use windows::Win32::System::Threading::{GetCurrentProcess, OpenProcessToken};

/// Whether the current process token is elevated (UAC "Run as administrator").
pub fn is_elevated() -> anyhow::Result<bool> {
  let mut token = HANDLE::default();
  // SAFETY: `GetCurrentProcess` returns a pseudo-handle that needs no closing; `token` is a valid
  // out-pointer and is closed below.
  unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) }
    .map_err(|e| anyhow::anyhow!("OpenProcessToken failed: {e:?}"))?;
  let _guard = HandleGuard(token);

  let mut elevation = TOKEN_ELEVATION::default();
  let mut returned = 0u32;
  // SAFETY: the buffer is a properly sized and aligned TOKEN_ELEVATION owned by this frame.
  unsafe {
    GetTokenInformation(
      token,
      TokenElevation,
      Some(&mut elevation as *mut TOKEN_ELEVATION as *mut core::ffi::c_void),
      std::mem::size_of::<TOKEN_ELEVATION>() as u32,
      &mut returned,
    )
  }
  .map_err(|e| anyhow::anyhow!("GetTokenInformation failed: {e:?}"))?;

  Ok(elevation.TokenIsElevated != 0)
}

struct HandleGuard(HANDLE);

impl Drop for HandleGuard {
  fn drop(&mut self) {
    unsafe {
      let _ = CloseHandle(self.0);
    }
  }
}
