//! ## Diagnostics
//!
//! Recovery is best effort, so most problems are not errors.  Every decoding or recovery
//! step that has to guess, truncate, or skip something pushes a `Diagnostic` into a collector
//! that travels with the result.  Pushing also forwards the message to the `log` facade,
//! so a console user sees the same events without the caller having to print anything.

use std::fmt;
use log::{info,warn,error};

#[derive(Clone,Copy,PartialEq,Eq,PartialOrd,Ord,Debug)]
pub enum Severity {
    Note,
    Warning,
    Error
}

/// What went wrong, in a form the caller can match on.
#[derive(Clone,Copy,PartialEq,Eq,Debug)]
pub enum Kind {
    DecompressionTruncated,
    UnexpectedEnd,
    CrcMismatch,
    SectorSkip,
    SectorRepeat,
    PhantomSector,
    GeometryUnresolved,
    MissingSectors,
    BpbInvalid,
    DirectoryNotFound,
    EntryReinterpreted,
    EntryDiscarded,
    ClusterChainCycle,
    ClusterChainBroken,
    ClusterChainOutOfRange,
    ClusterChainLimit,
    Info
}

#[derive(Clone,Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: Kind,
    pub message: String
}

/// Ordered collection of diagnostics.
#[derive(Clone,Debug,Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Note => write!(f,"note"),
            Self::Warning => write!(f,"warning"),
            Self::Error => write!(f,"error")
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f,"{}: {}",self.severity,self.message)
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }
    pub fn push(&mut self,severity: Severity,kind: Kind,message: &str) {
        match severity {
            Severity::Note => info!("{}",message),
            Severity::Warning => warn!("{}",message),
            Severity::Error => error!("{}",message)
        }
        self.items.push(Diagnostic { severity, kind, message: message.to_string() });
    }
    pub fn note(&mut self,kind: Kind,message: &str) {
        self.push(Severity::Note,kind,message);
    }
    pub fn warn(&mut self,kind: Kind,message: &str) {
        self.push(Severity::Warning,kind,message);
    }
    pub fn error(&mut self,kind: Kind,message: &str) {
        self.push(Severity::Error,kind,message);
    }
    /// Move everything from `other` into this collector, without logging again.
    pub fn append(&mut self,other: &mut Diagnostics) {
        self.items.append(&mut other.items);
    }
    pub fn iter(&self) -> std::slice::Iter<'_,Diagnostic> {
        self.items.iter()
    }
    pub fn len(&self) -> usize {
        self.items.len()
    }
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
    pub fn count(&self,kind: Kind) -> usize {
        self.items.iter().filter(|d| d.kind==kind).count()
    }
    pub fn has(&self,kind: Kind) -> bool {
        self.count(kind) > 0
    }
    pub fn worst(&self) -> Option<Severity> {
        self.items.iter().map(|d| d.severity).max()
    }
    pub fn to_json(&self) -> json::JsonValue {
        let mut ans = json::JsonValue::new_array();
        for d in &self.items {
            // push on an array value cannot fail
            let _ = ans.push(json::object! {
                severity: d.severity.to_string(),
                kind: format!("{:?}",d.kind),
                message: d.message.clone()
            });
        }
        ans
    }
}
