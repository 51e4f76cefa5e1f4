//! Arena search tree for one lane.

use super::planner::softmax;

/// One expanded position. Edge data (`reward`, `discount`) describes the
/// transition from the parent into this node.
#[derive(Debug, Clone)]
pub(crate) struct Node<S> {
    pub embedding: S,
    pub prior_logits: Vec<f32>,
    /// Network value at expansion time.
    pub raw_value: f32,
    /// Running mean of backed-up values.
    pub value: f32,
    pub visits: u32,
    /// Child node index per action; `None` until expanded.
    pub children: Vec<Option<usize>>,
    pub parent: Option<(usize, usize)>,
    pub reward: f32,
    pub discount: f32,
}

#[derive(Debug, Clone)]
pub(crate) struct Tree<S> {
    pub nodes: Vec<Node<S>>,
}

pub(crate) const ROOT: usize = 0;

impl<S> Tree<S> {
    /// Install the root with one visit, as if its value had been backed up once.
    pub fn new(embedding: S, prior_logits: Vec<f32>, value: f32, capacity: usize) -> Self {
        let num_actions = prior_logits.len();
        let mut nodes = Vec::with_capacity(capacity);
        nodes.push(Node {
            embedding,
            prior_logits,
            raw_value: value,
            value,
            visits: 1,
            children: vec![None; num_actions],
            parent: None,
            reward: 0.0,
            discount: 0.0,
        });
        Tree { nodes }
    }

    /// Visit count of every child of `node`, zero for unexpanded actions.
    pub fn child_visits(&self, node: usize) -> Vec<f32> {
        self.nodes[node]
            .children
            .iter()
            .map(|c| c.map_or(0.0, |i| self.nodes[i].visits as f32))
            .collect()
    }

    /// `reward + discount * value` of every child; zero for unexpanded actions.
    pub fn child_q(&self, node: usize) -> Vec<f32> {
        self.nodes[node]
            .children
            .iter()
            .map(|c| {
                c.map_or(0.0, |i| {
                    let child = &self.nodes[i];
                    child.reward + child.discount * child.value
                })
            })
            .collect()
    }

    pub fn prior_probs(&self, node: usize) -> Vec<f32> {
        softmax(&self.nodes[node].prior_logits)
    }

    /// Attach a freshly evaluated child under `(parent, action)`.
    #[allow(clippy::too_many_arguments)]
    pub fn expand(
        &mut self,
        parent: usize,
        action: usize,
        embedding: S,
        prior_logits: Vec<f32>,
        value: f32,
        reward: f32,
        discount: f32,
    ) -> usize {
        let num_actions = prior_logits.len();
        let idx = self.nodes.len();
        self.nodes.push(Node {
            embedding,
            prior_logits,
            raw_value: value,
            value,
            visits: 1,
            children: vec![None; num_actions],
            parent: Some((parent, action)),
            reward,
            discount,
        });
        self.nodes[parent].children[action] = Some(idx);
        idx
    }

    /// Propagate the leaf's value to the root.
    ///
    /// Each hop folds in the edge reward and discount
    /// (`v <- reward + discount * v`) and updates the parent's running mean.
    pub fn backup(&mut self, leaf: usize) {
        let mut leaf_value = self.nodes[leaf].value;
        let mut index = leaf;
        while let Some((parent, _)) = self.nodes[index].parent {
            let edge = &self.nodes[index];
            leaf_value = edge.reward + edge.discount * leaf_value;
            let p = &mut self.nodes[parent];
            let count = p.visits as f32;
            p.value = (p.value * count + leaf_value) / (count + 1.0);
            p.visits += 1;
            index = parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_expand() {
        let mut tree = Tree::new((), vec![0.0, 0.0, 0.0], 0.5, 4);
        let child = tree.expand(ROOT, 1, (), vec![0.0; 3], 0.25, 0.0, -1.0);
        assert_eq!(child, 1);
        assert_eq!(tree.nodes[ROOT].children[1], Some(1));
        assert_eq!(tree.child_visits(ROOT), vec![0.0, 1.0, 0.0]);
        assert_eq!(tree.child_q(ROOT), vec![0.0, -0.25, 0.0]);
    }

    #[test]
    fn test_backup_flips_sign_through_discount() {
        let mut tree = Tree::new((), vec![0.0, 0.0], 0.0, 4);
        let a = tree.expand(ROOT, 0, (), vec![0.0, 0.0], 0.0, 0.0, -1.0);
        tree.backup(a);
        let b = tree.expand(a, 1, (), vec![0.0, 0.0], 1.0, 0.0, -1.0);
        tree.backup(b);

        // b's value 1.0 becomes -1.0 at a, then +1.0 at the root.
        assert_eq!(tree.nodes[b].visits, 1);
        assert_eq!(tree.nodes[a].visits, 2);
        assert!((tree.nodes[a].value - (-0.5)).abs() < 1e-6);
        assert_eq!(tree.nodes[ROOT].visits, 3);
        assert!((tree.nodes[ROOT].value - (1.0 / 3.0)).abs() < 1e-6);
    }

    #[test]
    fn test_backup_uses_terminal_reward() {
        let mut tree = Tree::new((), vec![0.0], 0.0, 2);
        // Winning move: reward 1 for the mover, no continuation.
        let leaf = tree.expand(ROOT, 0, (), vec![f32::MIN], 0.0, 1.0, 0.0);
        tree.backup(leaf);
        assert!((tree.nodes[ROOT].value - 0.5).abs() < 1e-6);
        assert_eq!(tree.child_q(ROOT), vec![1.0]);
    }
}
