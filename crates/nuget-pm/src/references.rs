//! Assembly references of a compilation session
//!
//! The set only grows: each install appends its assembly images and nothing
//! is ever removed or replaced. Each compilation session owns its own
//! registry, so sessions never see each other's references.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Sink for assembly images destined for the compiler
pub trait ReferenceSink: Send + Sync {
    /// Append `blobs` to the session's references; zero blobs is a no-op
    fn add_references(&self, blobs: Vec<Vec<u8>>);
}

/// Append-only set of assembly references for one compilation session
///
/// Images are not validated; a malformed assembly only surfaces when the
/// compiler next consumes the set.
#[derive(Debug, Default)]
pub struct ReferenceRegistry {
    references: RwLock<Vec<Arc<[u8]>>>,
}

impl ReferenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.references.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.read().is_empty()
    }

    /// Every reference registered so far, in registration order
    pub fn references(&self) -> Vec<Arc<[u8]>> {
        self.references.read().clone()
    }
}

impl ReferenceSink for ReferenceRegistry {
    fn add_references(&self, blobs: Vec<Vec<u8>>) {
        if blobs.is_empty() {
            return;
        }

        let mut references = self.references.write();
        references.extend(blobs.into_iter().map(Arc::from));
        debug!(total = references.len(), "assembly references registered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_accumulate() {
        let registry = ReferenceRegistry::new();
        registry.add_references(vec![b"MZ1".to_vec()]);
        registry.add_references(vec![b"MZ2".to_vec(), b"MZ3".to_vec()]);

        let refs = registry.references();
        assert_eq!(refs.len(), 3);
        assert_eq!(&*refs[0], b"MZ1");
        assert_eq!(&*refs[1], b"MZ2");
        assert_eq!(&*refs[2], b"MZ3");
    }

    #[test]
    fn test_empty_add_is_noop() {
        let registry = ReferenceRegistry::new();
        registry.add_references(Vec::new());
        assert!(registry.is_empty());

        registry.add_references(vec![b"MZ".to_vec()]);
        registry.add_references(Vec::new());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_images_are_kept() {
        let registry = ReferenceRegistry::new();
        registry.add_references(vec![b"same".to_vec(), b"same".to_vec()]);
        assert_eq!(registry.len(), 2);
    }
}
