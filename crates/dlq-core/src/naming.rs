//! Resource naming conventions shared by every broker.

/// DNS suffix appended to a short namespace resource name.
pub const NAMESPACE_SUFFIX: &str = ".servicebus.windows.net";

/// Path suffix addressing the dead-letter sub-queue of a queue.
pub const DEAD_LETTER_SUFFIX: &str = "/$deadletterqueue";

/// Builds the fully qualified host name of a namespace from its short resource name.
///
/// ```
/// assert_eq!(
///     dlq::naming::fully_qualified_namespace("contoso"),
///     "contoso.servicebus.windows.net"
/// );
/// ```
pub fn fully_qualified_namespace(resource_name: &str) -> String {
    format!("{resource_name}{NAMESPACE_SUFFIX}")
}

/// Returns the address of the dead-letter sub-queue of `queue_name`.
///
/// The function is not idempotent: passing a dead-letter address nests the
/// suffix a second time.
pub fn dead_letter_queue_name(queue_name: &str) -> String {
    format!("{queue_name}{DEAD_LETTER_SUFFIX}")
}

/// Returns the parent queue of a dead-letter address, or `None` for a plain queue name.
pub fn dead_letter_parent(queue_name: &str) -> Option<&str> {
    queue_name.strip_suffix(DEAD_LETTER_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_appends_suffix() {
        assert_eq!(
            fully_qualified_namespace("orders-prod"),
            "orders-prod.servicebus.windows.net"
        );
        assert_eq!(
            fully_qualified_namespace("orders-prod"),
            fully_qualified_namespace("orders-prod")
        );
    }

    #[test]
    fn dead_letter_name_appends_suffix() {
        assert_eq!(dead_letter_queue_name("orders"), "orders/$deadletterqueue");
    }

    #[test]
    fn dead_letter_name_nests_when_applied_twice() {
        let twice = dead_letter_queue_name(&dead_letter_queue_name("orders"));
        assert_eq!(twice, "orders/$deadletterqueue/$deadletterqueue");
        assert_ne!(twice, dead_letter_queue_name("orders"));
    }

    #[test]
    fn parent_of_dead_letter_address() {
        assert_eq!(dead_letter_parent("orders/$deadletterqueue"), Some("orders"));
        assert_eq!(dead_letter_parent("orders"), None);
        assert_eq!(
            dead_letter_parent(&dead_letter_queue_name("a/b")),
            Some("a/b")
        );
    }
}
