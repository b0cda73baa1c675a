use std::collections::HashMap;

/// One segment position of the route trie.
///
/// A node is terminal iff it carries a handler.
#[derive(Debug)]
pub(crate) struct Node<H> {
    children: HashMap<String, Node<H>>,
    /// Kept in insertion order, which is the order they are tried in.
    variables: Vec<(String, Node<H>)>,
    handler: Option<H>,
}

/// A parsed segment of a route definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Segment<'a> {
    Literal(&'a str),
    Variable(&'a str),
}

impl<H> Node<H> {
    pub(crate) fn new() -> Self {
        Self {
            children: HashMap::new(),
            variables: Vec::new(),
            handler: None,
        }
    }

    /// Walks the trie along `segments`, creating missing nodes, and stores `handler` at the end.
    ///
    /// Gives the handler back if the final node is already terminal.
    pub(crate) fn insert(&mut self, segments: &[Segment<'_>], handler: H) -> Result<(), H> {
        let mut node = self;
        for segment in segments {
            node = match *segment {
                Segment::Literal(literal) => node
                    .children
                    .entry(literal.to_string())
                    .or_insert_with(Node::new),
                Segment::Variable(name) => node.variable_child(name),
            };
        }

        if node.handler.is_some() {
            Err(handler)
        } else {
            node.handler = Some(handler);
            Ok(())
        }
    }

    fn variable_child(&mut self, name: &str) -> &mut Node<H> {
        let index = match self.variables.iter().position(|(known, _)| known == name) {
            Some(index) => index,
            None => {
                self.variables.push((name.to_string(), Node::new()));
                self.variables.len() - 1
            }
        };
        &mut self.variables[index].1
    }

    /// Depth-first search for a terminal node matching `segments`.
    ///
    /// The literal child is tried first, including its whole subtree.
    /// Only if that fails, every variable child is tried in insertion order.
    /// Bindings are pushed while unwinding out of a successful branch, so failed branches leave
    /// `bindings` untouched.
    pub(crate) fn search<'n>(
        &'n self,
        segments: &[&str],
        bindings: &mut Vec<(String, String)>,
    ) -> Option<&'n H> {
        let Some((segment, rest)) = segments.split_first() else {
            return self.handler.as_ref();
        };

        if let Some(child) = self.children.get(*segment) {
            if let Some(handler) = child.search(rest, bindings) {
                return Some(handler);
            }
        }

        for (name, child) in &self.variables {
            if let Some(handler) = child.search(rest, bindings) {
                bindings.push((name.clone(), (*segment).to_string()));
                return Some(handler);
            }
        }

        None
    }

    /// The literal children of this node, used by the router to enumerate methods at the root.
    pub(crate) fn literal_children(&self) -> impl Iterator<Item = (&str, &Node<H>)> {
        self.children
            .iter()
            .map(|(segment, child)| (segment.as_str(), child))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(node: &mut Node<u32>, segments: &[Segment<'_>], handler: u32) {
        assert!(node.insert(segments, handler).is_ok());
    }

    #[test]
    fn literal_subtree_is_exhausted_before_variables() {
        let mut root = Node::new();
        // `/a/b/c` is literal at the second position but cannot complete `/a/b/d`.
        insert(
            &mut root,
            &[Segment::Literal("a"), Segment::Literal("b"), Segment::Literal("c")],
            1,
        );
        insert(
            &mut root,
            &[Segment::Literal("a"), Segment::Variable("x"), Segment::Literal("d")],
            2,
        );

        let mut bindings = Vec::new();
        assert_eq!(root.search(&["a", "b", "d"], &mut bindings), Some(&2));
        assert_eq!(bindings, vec![("x".to_string(), "b".to_string())]);

        let mut bindings = Vec::new();
        assert_eq!(root.search(&["a", "b", "c"], &mut bindings), Some(&1));
        assert!(bindings.is_empty());
    }

    #[test]
    fn variables_are_tried_in_insertion_order() {
        let mut root = Node::new();
        insert(&mut root, &[Segment::Variable("first"), Segment::Literal("x")], 1);
        insert(&mut root, &[Segment::Variable("second"), Segment::Literal("y")], 2);
        insert(&mut root, &[Segment::Variable("third")], 3);

        let mut bindings = Vec::new();
        assert_eq!(root.search(&["v", "y"], &mut bindings), Some(&2));
        assert_eq!(bindings, vec![("second".to_string(), "v".to_string())]);

        let mut bindings = Vec::new();
        assert_eq!(root.search(&["v"], &mut bindings), Some(&3));
        assert_eq!(bindings, vec![("third".to_string(), "v".to_string())]);
    }

    #[test]
    fn bindings_are_recorded_while_unwinding() {
        let mut root = Node::new();
        insert(
            &mut root,
            &[Segment::Variable("outer"), Segment::Variable("inner")],
            1,
        );

        let mut bindings = Vec::new();
        assert_eq!(root.search(&["1", "2"], &mut bindings), Some(&1));
        assert_eq!(
            bindings,
            vec![
                ("inner".to_string(), "2".to_string()),
                ("outer".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn inner_nodes_are_not_terminal() {
        let mut root = Node::new();
        insert(&mut root, &[Segment::Literal("a"), Segment::Literal("b")], 1);
        assert_eq!(root.search(&["a"], &mut Vec::new()), None);
        assert_eq!(root.search(&["a", "b", "c"], &mut Vec::new()), None);
    }

    #[test]
    fn occupied_terminal_gives_handler_back() {
        let mut root = Node::new();
        insert(&mut root, &[Segment::Literal("a")], 1);
        assert_eq!(root.insert(&[Segment::Literal("a")], 2), Err(2));
    }
}
