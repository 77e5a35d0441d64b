//! Variable-length kinds: the wire value points at a length-prefixed buffer.
//!
//! The host may hand out an indirect (compressed or out-of-line) form, which
//! must be normalized before the payload can be read. Normalization copies
//! into the current memory context, so it is done lazily and cached.
//!
//! The cached form is tied to the staleness counters:
//!
//! - if the source value's owner was reset, every access fails with
//!   [`Error::PointerGone`];
//! - if the normalized copy's context was reset but the source is intact,
//!   the copy is recomputed;
//! - a plain source needs no copy and is reused as long as the source lives.

use core::cell::{Cell, RefCell};
use core::fmt;

use super::{ArenaHint, FromWire, IntoWire, WireType, expect_type};
use crate::error::{Error, Result};
use crate::host::{VarlenaForm, VarlenaHeader};
use crate::memory::TrackedMemoryContext;
use crate::session::Session;
use crate::wire::{Oid, WireValue, oids};

struct Normalized {
    value: WireValue,
    /// Context holding the copy, if normalization had to copy.
    copy: Option<TrackedMemoryContext>,
}

impl Normalized {
    fn is_usable(&self) -> bool {
        self.copy.as_ref().is_none_or(|copy| !copy.is_stale())
    }
}

/// A raw variable-length value.
pub struct Varlena {
    hint: ArenaHint,
    raw: WireValue,
    normalized: RefCell<Option<Normalized>>,
}

impl Varlena {
    pub fn from_raw(raw: WireValue, hint: &ArenaHint) -> Self {
        Varlena {
            hint: hint.clone(),
            raw,
            normalized: RefCell::new(None),
        }
    }

    /// The value as the host handed it out.
    pub fn raw(&self) -> WireValue {
        self.raw
    }

    pub fn header(&self) -> Result<VarlenaHeader> {
        self.hint.check()?;
        self.hint.session().guard(|host| host.varlena_header(self.raw))
    }

    /// Whether a usable normalized form is cached.
    pub fn is_normalized(&self) -> bool {
        self.normalized.borrow().as_ref().is_some_and(Normalized::is_usable)
    }

    /// The plain form of the value.
    pub fn normalized(&self) -> Result<WireValue> {
        self.hint.check()?;
        if let Some(cached) = self.normalized.borrow().as_ref().filter(|n| n.is_usable()) {
            return Ok(cached.value);
        }

        let session = self.hint.session();
        let context = session.current_context();
        let (form, value) = session.guard(|host| {
            let form = host.varlena_header(self.raw).form;
            (form, host.detoast(context.id(), self.raw))
        })?;
        let copy = match form {
            VarlenaForm::Plain => None,
            VarlenaForm::Indirect => Some(session.track(context)),
        };
        *self.normalized.borrow_mut() = Some(Normalized { value, copy });
        Ok(value)
    }

    /// Runs `f` on the payload bytes, header excluded.
    ///
    /// The source's owner and the normalized copy's context stay borrowed
    /// while `f` runs.
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let value = self.normalized()?;
        let copy = self.normalized.borrow().as_ref().and_then(|n| n.copy.clone());
        let read = || -> Result<R> {
            // SAFETY: `normalized` just checked that neither the source nor
            // the copy was reset, and both are borrowed until `f` returns.
            let bytes = self
                .hint
                .session()
                .guard(|host| unsafe { host.varlena_payload(value) })?;
            Ok(f(bytes))
        };
        while_borrowed(self.hint.owner(), || while_borrowed(copy.as_ref(), read))
    }

    /// Copies the payload bytes out.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.with_bytes(<[u8]>::to_vec)
    }
}

fn while_borrowed<R>(owner: Option<&TrackedMemoryContext>, f: impl FnOnce() -> Result<R>) -> Result<R> {
    match owner {
        Some(owner) => owner.borrowed(f)?,
        None => f(),
    }
}

impl fmt::Debug for Varlena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Varlena")
            .field("raw", &self.raw)
            .field("normalized", &self.is_normalized())
            .finish()
    }
}

impl WireType for Varlena {
    fn type_oid() -> Oid {
        oids::BYTEA
    }

    fn accepts(oid: Oid, session: &Session) -> bool {
        session.is_varlena(oid)
    }
}

impl FromWire for Varlena {
    fn from_wire(value: WireValue, oid: Oid, hint: &ArenaHint) -> Result<Self> {
        expect_type::<Self>(oid, hint.session())?;
        Ok(Varlena::from_raw(value, hint))
    }
}

impl IntoWire for Varlena {
    fn into_wire(self, _session: &Session) -> Result<WireValue> {
        self.hint.check()?;
        Ok(self.raw)
    }
}

/// A text value read in place, validated as UTF-8 on first use.
#[derive(Debug)]
pub struct Text {
    varlena: Varlena,
    type_oid: Oid,
    validated: Cell<bool>,
}

impl Text {
    pub fn varlena(&self) -> &Varlena {
        &self.varlena
    }

    /// Runs `f` on the text. Fails if the payload is not UTF-8.
    pub fn with_str<R>(&self, f: impl FnOnce(&str) -> R) -> Result<R> {
        self.varlena.with_bytes(|bytes| -> Result<R> {
            if self.validated.get() {
                // SAFETY: validated on an earlier call; the payload is immutable.
                return Ok(f(unsafe { core::str::from_utf8_unchecked(bytes) }));
            }
            let text = core::str::from_utf8(bytes).map_err(|_| Error::conversion::<str>(self.type_oid))?;
            self.validated.set(true);
            Ok(f(text))
        })?
    }

    /// Copies the text out.
    pub fn read_string(&self) -> Result<String> {
        self.with_str(str::to_owned)
    }
}

impl WireType for Text {
    fn type_oid() -> Oid {
        oids::TEXT
    }

    fn accepts(oid: Oid, _session: &Session) -> bool {
        matches!(oid, oids::TEXT | oids::VARCHAR | oids::BPCHAR)
    }
}

impl FromWire for Text {
    fn from_wire(value: WireValue, oid: Oid, hint: &ArenaHint) -> Result<Self> {
        expect_type::<Self>(oid, hint.session())?;
        Ok(Text {
            varlena: Varlena::from_raw(value, hint),
            type_oid: oid,
            validated: Cell::new(false),
        })
    }
}

impl IntoWire for Text {
    fn into_wire(self, session: &Session) -> Result<WireValue> {
        self.varlena.into_wire(session)
    }

    fn wire_type(&self) -> Oid {
        self.type_oid
    }
}

/// A byte array read in place.
#[derive(Debug)]
pub struct Bytea(Varlena);

impl Bytea {
    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        self.0.with_bytes(f)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.0.to_vec()
    }
}

impl WireType for Bytea {
    fn type_oid() -> Oid {
        oids::BYTEA
    }
}

impl FromWire for Bytea {
    fn from_wire(value: WireValue, oid: Oid, hint: &ArenaHint) -> Result<Self> {
        expect_type::<Self>(oid, hint.session())?;
        Ok(Bytea(Varlena::from_raw(value, hint)))
    }
}

impl IntoWire for Bytea {
    fn into_wire(self, session: &Session) -> Result<WireValue> {
        self.0.into_wire(session)
    }
}

/// Copies `bytes` into a new varlena in the current memory context.
fn make_varlena(session: &Session, bytes: &[u8]) -> Result<WireValue> {
    let context = session.current_context();
    session
        .guard(|host| host.make_varlena(context.id(), bytes))?
        .ok_or(Error::AllocationFailure {
            size: bytes.len(),
            context: context.id(),
        })
}

impl WireType for String {
    fn type_oid() -> Oid {
        oids::TEXT
    }

    fn accepts(oid: Oid, session: &Session) -> bool {
        Text::accepts(oid, session)
    }
}

impl FromWire for String {
    fn from_wire(value: WireValue, oid: Oid, hint: &ArenaHint) -> Result<Self> {
        Text::from_wire(value, oid, hint)?.read_string()
    }
}

impl IntoWire for String {
    fn into_wire(self, session: &Session) -> Result<WireValue> {
        make_varlena(session, self.as_bytes())
    }
}

impl WireType for &str {
    fn type_oid() -> Oid {
        oids::TEXT
    }
}

impl IntoWire for &str {
    fn into_wire(self, session: &Session) -> Result<WireValue> {
        make_varlena(session, self.as_bytes())
    }
}

impl WireType for Vec<u8> {
    fn type_oid() -> Oid {
        oids::BYTEA
    }
}

impl FromWire for Vec<u8> {
    fn from_wire(value: WireValue, oid: Oid, hint: &ArenaHint) -> Result<Self> {
        Bytea::from_wire(value, oid, hint)?.to_vec()
    }
}

impl IntoWire for Vec<u8> {
    fn into_wire(self, session: &Session) -> Result<WireValue> {
        make_varlena(session, &self)
    }
}

impl WireType for &[u8] {
    fn type_oid() -> Oid {
        oids::BYTEA
    }
}

impl IntoWire for &[u8] {
    fn into_wire(self, session: &Session) -> Result<WireValue> {
        make_varlena(session, self)
    }
}
