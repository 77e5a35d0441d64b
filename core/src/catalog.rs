//! Type catalog lookups.

use crate::error::{Error, Result};
use crate::host::{RowShape, TypeInfo, TypeKind};
use crate::session::Session;
use crate::wire::{Oid, oids};

impl Session {
    /// Looks `oid` up in the host's type cache.
    pub fn type_info(&self, oid: Oid) -> Result<TypeInfo> {
        self.guard(|host| host.lookup_type(oid))?
            .ok_or(Error::UnknownType(oid))
    }

    /// Column layout of a composite type. `None` for non-composite types.
    pub fn composite_shape(&self, oid: Oid) -> Result<Option<RowShape>> {
        self.guard(|host| host.composite_shape(oid))
    }

    pub fn is_composite(&self, oid: Oid) -> bool {
        oid == oids::RECORD
            || self
                .host()
                .lookup_type(oid)
                .is_some_and(|info| info.kind == TypeKind::Composite)
    }

    /// Whether values of `oid` are length-prefixed and passed by reference.
    pub fn is_varlena(&self, oid: Oid) -> bool {
        self.host()
            .lookup_type(oid)
            .is_some_and(|info| info.len == -1 && info.kind != TypeKind::Composite)
    }
}
