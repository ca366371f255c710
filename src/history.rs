use url::Url;

#[derive(Debug)]
struct Node {
    url: Url,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Tree of visited URLs. Navigating back does not prune the branch the
/// user came from, and navigating somewhere new from the middle of the
/// tree forks a fresh branch instead of rewriting the old one.
#[derive(Debug, Default)]
pub struct History {
    nodes: Vec<Node>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a visit as a child of `parent` and return its index.
    pub fn push(&mut self, parent: Option<usize>, url: Url) -> usize {
        let parent = parent.filter(|&index| index < self.nodes.len());
        let index = self.nodes.len();
        self.nodes.push(Node {
            url,
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            self.nodes[parent].children.push(index);
        }
        index
    }

    pub fn get(&self, index: usize) -> Option<&Url> {
        self.nodes.get(index).map(|node| &node.url)
    }

    pub fn one_backward(&self, index: Option<usize>) -> Option<usize> {
        self.nodes.get(index?)?.parent
    }

    /// Step forward into the branch taken most recently from here.
    pub fn one_forward(&self, index: Option<usize>) -> Option<usize> {
        self.nodes.get(index?)?.children.last().copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
