use smallvec::SmallVec;
use std::time::Instant;

/// Handle to an open span. Its only valid use is being passed back to
/// [`end`](SpanTree::end), exactly once, in the reverse order spans were opened in.
#[must_use]
pub struct SpanToken {
    pub(crate) index: u32,
}

/// A GPU timestamp pair requested by a span, not yet resolved.
pub(crate) struct QueryRequest {
    pub label: &'static str,
    /// Index of the start timestamp within the owning frame's query set; the end
    /// timestamp lives at `pair_index + 1`.
    pub pair_index: u32,
}

pub(crate) struct SpanRecord {
    pub label: &'static str,
    pub cpu_start: Instant,
    pub cpu_end: Option<Instant>,
    /// Indices of closed child spans, in the order they were opened.
    pub children: Vec<u32>,
    pub queries: SmallVec<[QueryRequest; 2]>,
}

impl SpanRecord {
    fn open(label: &'static str) -> Self {
        Self {
            label,
            cpu_start: Instant::now(),
            cpu_end: None,
            children: Vec::new(),
            queries: SmallVec::new(),
        }
    }
}

/// Stack-based builder for one frame's span tree.
///
/// Spans live in a flat list and refer to their children by index, so there are no
/// parent/child reference cycles to manage. Index 0 is always the frame's implicit
/// root span, opened by [`start`](SpanTree::start) and closed by
/// [`finish`](SpanTree::finish).
///
/// The stack discipline is a hard contract: every opened span must be ended before
/// its parent, and violations panic instead of silently corrupting the tree.
pub(crate) struct SpanTree {
    spans: Vec<SpanRecord>,
    /// Indices of currently open spans, root first.
    open: Vec<u32>,
}

impl SpanTree {
    /// Opens the frame's implicit root span.
    pub fn start() -> Self {
        Self {
            spans: vec![SpanRecord::open("frame")],
            open: vec![0],
        }
    }

    /// Opens a child span under the currently open span.
    pub fn nest(&mut self, label: &'static str) -> SpanToken {
        let index = self.spans.len() as u32;
        self.spans.push(SpanRecord::open(label));
        self.open.push(index);
        SpanToken { index }
    }

    /// Closes a span, appending it to its parent's child list.
    ///
    /// ## Panics
    /// Panics if `token` is not the innermost open span.
    pub fn end(&mut self, token: SpanToken) {
        let top = *self.open.last().unwrap();
        assert!(top != 0, "no span is open besides the frame root");
        assert!(
            token.index == top,
            "span ended out of stack order: expected `{}`",
            self.spans[top as usize].label,
        );

        self.open.pop();
        self.spans[top as usize].cpu_end = Some(Instant::now());

        let parent = *self.open.last().unwrap();
        self.spans[parent as usize].children.push(top);
    }

    /// Attributes a GPU query request to the currently open span.
    pub fn attach_query(&mut self, request: QueryRequest) {
        let top = *self.open.last().unwrap();
        self.spans[top as usize].queries.push(request);
    }

    /// Closes the root span and finalizes the tree. GPU queries are still pending at
    /// this point; they get merged in once the frame's readback completes.
    ///
    /// ## Panics
    /// Panics if any nested span is still open.
    pub fn finish(mut self) -> FinishedSpans {
        assert!(
            self.open.len() == 1,
            "unbalanced span stack: `{}` was never ended",
            self.spans[*self.open.last().unwrap() as usize].label,
        );
        self.spans[0].cpu_end = Some(Instant::now());
        FinishedSpans { spans: self.spans }
    }
}

/// A finalized frame's span tree, immutable from here on.
pub(crate) struct FinishedSpans {
    pub spans: Vec<SpanRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Pre-order label walk, excluding the root.
    fn preorder(finished: &FinishedSpans) -> Vec<&'static str> {
        fn walk(finished: &FinishedSpans, index: u32, out: &mut Vec<&'static str>) {
            let span = &finished.spans[index as usize];
            if index != 0 {
                out.push(span.label);
            }
            for &child in &span.children {
                walk(finished, child, out);
            }
        }

        let mut out = vec![];
        walk(finished, 0, &mut out);
        out
    }

    #[test]
    fn preorder_matches_call_sequence() {
        let mut tree = SpanTree::start();

        let a = tree.nest("a");
        let b = tree.nest("b");
        tree.end(b);
        tree.end(a);
        let c = tree.nest("c");
        tree.end(c);

        let finished = tree.finish();
        assert_eq!(preorder(&finished), ["a", "b", "c"]);
    }

    #[test]
    fn nested_scenario() {
        let mut tree = SpanTree::start();
        let a = tree.nest("a");
        let b = tree.nest("b");
        tree.end(b);
        tree.end(a);
        let finished = tree.finish();

        let root = &finished.spans[0];
        assert_eq!(root.children.len(), 1);

        let a = &finished.spans[root.children[0] as usize];
        assert_eq!(a.label, "a");
        assert_eq!(a.children.len(), 1);

        let b = &finished.spans[a.children[0] as usize];
        assert_eq!(b.label, "b");
        assert!(b.children.is_empty());
    }

    #[test]
    fn child_intervals_nest_within_parents() {
        let mut tree = SpanTree::start();
        let outer = tree.nest("outer");
        let inner = tree.nest("inner");
        std::thread::sleep(std::time::Duration::from_millis(1));
        tree.end(inner);
        tree.end(outer);
        let finished = tree.finish();

        let root = &finished.spans[0];
        let outer = &finished.spans[root.children[0] as usize];
        let inner = &finished.spans[outer.children[0] as usize];

        for (parent, child) in [(root, outer), (outer, inner)] {
            assert!(parent.cpu_start <= child.cpu_start);
            assert!(child.cpu_end.unwrap() <= parent.cpu_end.unwrap());
        }
    }

    #[test]
    fn queries_attach_to_the_open_span() {
        let mut tree = SpanTree::start();
        let a = tree.nest("a");
        tree.attach_query(QueryRequest {
            label: "draw",
            pair_index: 0,
        });
        tree.end(a);
        tree.attach_query(QueryRequest {
            label: "root query",
            pair_index: 2,
        });
        let finished = tree.finish();

        let root = &finished.spans[0];
        assert_eq!(root.queries.len(), 1);
        assert_eq!(root.queries[0].label, "root query");

        let a = &finished.spans[root.children[0] as usize];
        assert_eq!(a.queries.len(), 1);
        assert_eq!(a.queries[0].label, "draw");
    }

    #[test]
    #[should_panic(expected = "out of stack order")]
    fn out_of_order_end_panics() {
        let mut tree = SpanTree::start();
        let a = tree.nest("a");
        let _b = tree.nest("b");
        tree.end(a);
    }

    #[test]
    #[should_panic(expected = "unbalanced span stack")]
    fn finishing_with_open_spans_panics() {
        let mut tree = SpanTree::start();
        let _a = tree.nest("a");
        tree.finish();
    }
}
