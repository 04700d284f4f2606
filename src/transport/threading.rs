//! Thread-id derivation (spec §3, §4.2): use the server-supplied thread id
//! when present; otherwise walk `In-Reply-To`/`References` to the earliest
//! known ancestor and take its `Message-ID` as the thread id; if no ancestor
//! is known, use the message's own `Message-ID`.

/// References lists ancestors oldest-first by convention; prefer it over
/// In-Reply-To (which names only the immediate parent) when present.
pub fn candidate_ancestors<'a>(in_reply_to: Option<&'a str>, references: &'a [String]) -> Vec<&'a str> {
    if !references.is_empty() {
        references.iter().map(|s| s.as_str()).collect()
    } else if let Some(parent) = in_reply_to {
        vec![parent]
    } else {
        vec![]
    }
}

/// `lookup(message_id)` resolves a `Message-ID` header value to the thread
/// id already recorded for that message (if it has been seen before), so
/// the walk can terminate at the earliest *known* ancestor without needing
/// every message in the chain to be present.
pub fn derive_thread_id(
    server_thread_id: Option<&str>,
    message_id: &str,
    in_reply_to: Option<&str>,
    references: &[String],
    lookup: impl Fn(&str) -> Option<String>,
) -> String {
    if let Some(tid) = server_thread_id {
        if !tid.is_empty() {
            return tid.to_string();
        }
    }

    let ancestors = candidate_ancestors(in_reply_to, references);

    for ancestor in &ancestors {
        if let Some(thread_id) = lookup(ancestor) {
            return thread_id;
        }
    }

    // No known ancestor: the earliest element of References (if any) is the
    // oldest ancestor we know about by id, even though we've never stored
    // it; otherwise fall back to this message's own id.
    ancestors.first().copied().unwrap_or(message_id).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_server_supplied_thread_id() {
        let tid = derive_thread_id(Some("thread-1"), "<m1@x>", None, &[], |_| None);
        assert_eq!(tid, "thread-1");
    }

    #[test]
    fn falls_back_to_known_ancestor_thread() {
        let tid = derive_thread_id(
            None,
            "<m3@x>",
            Some("<m2@x>"),
            &[],
            |id| if id == "<m2@x>" { Some("thread-abc".to_string()) } else { None },
        );
        assert_eq!(tid, "thread-abc");
    }

    #[test]
    fn walks_references_oldest_first() {
        let refs = vec!["<m1@x>".to_string(), "<m2@x>".to_string()];
        let tid = derive_thread_id(None, "<m3@x>", Some("<m2@x>"), &refs, |id| {
            if id == "<m1@x>" {
                Some("thread-root".to_string())
            } else {
                None
            }
        });
        assert_eq!(tid, "thread-root");
    }

    #[test]
    fn uses_own_message_id_with_no_ancestors() {
        let tid = derive_thread_id(None, "<m1@x>", None, &[], |_| None);
        assert_eq!(tid, "<m1@x>");
    }
}
