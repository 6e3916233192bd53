//! Native PKCS#11 binding of the device seam.

#![allow(non_snake_case)]

/// Call a PKCS#11 function of an [`HsmLib`] and turn any return value but `CKR_OK` into a
/// [`crate::HError::Token`] returned from the enclosing function.
macro_rules! hsm_call {
    ($hsm:expr, $msg:expr, $func:ident $(, $arg:expr)* $(,)?) => {{
        #[allow(unsafe_code)]
        let rv = unsafe {
            $hsm.$func.ok_or_else(|| {
                $crate::HError::Default(
                    concat!(stringify!($func), " not available on library").to_owned(),
                )
            })?($($arg),*)
        };
        if rv != pkcs11_sys::CKR_OK {
            return Err($crate::HError::Token(format!("{}: {rv:#x}", $msg)));
        }
    }};
}

/// Convert a handle, ID or mechanism code to `CK_ULONG`, which is 32 bits wide on some
/// platforms.
#[allow(clippy::useless_conversion, clippy::unnecessary_fallible_conversions)]
pub(crate) fn ck_ulong(value: u64) -> crate::HResult<pkcs11_sys::CK_ULONG> {
    pkcs11_sys::CK_ULONG::try_from(value).map_err(|_| {
        crate::HError::InvalidParameter(format!("{value:#x} does not fit a CK_ULONG"))
    })
}

mod hsm_lib;
mod session;
mod slot;

pub use hsm_lib::HsmLib;
pub use session::Pkcs11Session;
pub use slot::Pkcs11Slot;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::useless_conversion)]
mod tests {
    use std::mem::size_of;

    use pkcs11_sys::{CK_ULONG, CKM_SHA256};

    use super::ck_ulong;
    use crate::HError;

    #[test]
    fn codes_that_fit_a_ck_ulong_are_kept() {
        assert_eq!(ck_ulong(0x0250).unwrap(), CKM_SHA256);
        assert_eq!(ck_ulong(u64::from(u32::MAX)).unwrap(), CK_ULONG::from(u32::MAX));
    }

    #[test]
    fn values_wider_than_a_ck_ulong_are_refused() {
        let too_wide = u64::from(u32::MAX) + 1;
        if size_of::<CK_ULONG>() < size_of::<u64>() {
            assert!(matches!(ck_ulong(too_wide), Err(HError::InvalidParameter(_))));
        } else {
            assert_eq!(u64::from(ck_ulong(too_wide).unwrap()), too_wide);
        }
    }
}
