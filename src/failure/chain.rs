use core::iter::FusedIterator;

use super::{Cause, Failure};

/// Iterator over a record and the records it was caused by.
///
/// Created by [`Failure::chain`].
#[derive(Debug, Clone)]
#[must_use = "iterators are lazy and do nothing unless consumed"]
pub struct Chain<'a> {
    next: Option<&'a Failure>,
}

impl<'a> Chain<'a> {
    pub(super) fn new(head: &'a Failure) -> Self {
        Self { next: Some(head) }
    }
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a Failure;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = match current.cause() {
            Some(Cause::Failure(next)) => Some(next),
            _ => None,
        };
        Some(current)
    }
}

impl FusedIterator for Chain<'_> {}

#[cfg(test)]
mod tests {
    use crate::{Kind, create_error, wrap_error};

    #[test]
    fn test_chain_walks_failure_links() {
        let bottom = create_error(Kind::IO, "bottom", None, Some("raw text".into()));
        let middle = wrap_error(Kind::new("LoadError"), bottom, None, None);
        let top = wrap_error(Kind::new("StartError"), middle, Some("start failed"), None);

        let kinds: Vec<_> = top.chain().map(|f| f.kind().as_str()).collect();
        assert_eq!(kinds, ["StartError", "LoadError", "IoError"]);

        // Message defaults to the cause's message.
        let messages: Vec<_> = top.chain().map(|f| f.message()).collect();
        assert_eq!(messages, ["start failed", "bottom", "bottom"]);
    }

    #[test]
    fn test_chain_of_single_record() {
        let lone = create_error(Kind::ERROR, "alone", None, None);
        assert_eq!(lone.chain().count(), 1);
    }
}
