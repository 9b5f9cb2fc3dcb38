use std::ptr::NonNull;

use thiserror::Error;

use crate::{
    ABI_VERSION, AbiExports, AbiVersion, EXPORTS_NAME, Erased, HostValue, Interface, InterfacePtr,
    InterfaceRef, TypeTag, W, Wr,
};

// === AbiError === //

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum AbiError {
    #[error("package `{package}` has not registered the trait ABI")]
    NotRegistered { package: String },

    #[error("trait ABI {found} cannot serve a consumer built against {required}")]
    IncompatibleVersion {
        found: AbiVersion,
        required: AbiVersion,
    },
}

// === AbiImports === //

/// A consumer's view of another module's trait ABI, resolved through the host's routine discovery.
///
/// Consumers never link against the producer. They go through the function pointers it published
/// with [`register`](crate::register).
#[derive(Debug, Copy, Clone)]
pub struct AbiImports {
    exports: &'static AbiExports,
}

impl AbiImports {
    /// Resolves the trait ABI registered under `package`, requiring a version compatible with the
    /// one this crate was built against.
    pub fn load(package: &str, w: Wr) -> Result<Self, AbiError> {
        Self::load_with(package, ABI_VERSION, w)
    }

    pub fn load_with(package: &str, required: AbiVersion, w: Wr) -> Result<Self, AbiError> {
        let exports = w
            .callable::<AbiExports>(package, EXPORTS_NAME)
            .ok_or_else(|| AbiError::NotRegistered {
                package: package.to_owned(),
            })?;

        if !exports.version.supports(required) {
            return Err(AbiError::IncompatibleVersion {
                found: exports.version,
                required,
            });
        }

        Ok(Self { exports })
    }

    pub fn version(self) -> AbiVersion {
        self.exports.version
    }

    /// ## Safety
    ///
    /// See [`wrap`](crate::wrap).
    ///
    pub unsafe fn wrap(self, object: NonNull<Erased>, w: W) -> HostValue {
        unsafe { (self.exports.wrap)(object, w) }
    }

    pub fn get(self, value: &HostValue, w: Wr) -> Option<NonNull<Erased>> {
        (self.exports.get)(value, w)
    }

    pub fn query(self, value: &HostValue, tag: TypeTag, w: Wr) -> Option<InterfacePtr> {
        (self.exports.query)(value, tag, w)
    }

    pub fn query_as<I: Interface>(self, value: &HostValue, w: Wr) -> Option<InterfaceRef<I>> {
        let object = self.get(value, w)?;
        let table = self.query(value, I::TAG, w)?;

        // SAFETY: `table` answered a query for `I::TAG` on `object`.
        Some(unsafe { InterfaceRef::from_raw_parts(object, table) })
    }
}
