//! Light-Range Tree
//!
//! A complete binary tree over one froxel's light list, keyed by each light's
//! normalized-device depth range. A shader walks it to find the lights whose range
//! contains a fragment's depth without testing every light.
//!
//! The tree is stored in pre-order. Every node carries a `next` index pointing
//! past its subtree, so a traversal that rejects a node jumps straight to its
//! next sibling:
//!
//! ```text
//! 0 ─┬─ 1 ─┬─ 2 (leaf)
//!    │     └─ 3 (leaf)
//!    └─ 4 ─┬─ 5 (leaf)
//!          └─ 6 (leaf)
//! next: 0→7, 1→4, 2→3, 3→4, 4→7, 5→6, 6→7
//! ```
//!
//! Leaves are padded to a power of two; padding leaves hold an empty range.

use glam::Vec2;

/// One node of the light tree.
///
/// WGSL Layout (16 bytes):
///   offset  0: min (f32)
///   offset  4: max (f32)
///   offset  8: next (u16) - Index of the first node after this subtree
///   offset 10: offset (u16) - Leaf: light index. Inner: first leaf slot
///   offset 12: count (u16) - Leaf: 1, or 0 for padding. Inner: leaf slots covered
///   offset 14: is_leaf (u8)
///   offset 15: reserved (u8)
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightTreeNode {
    pub min: f32,
    pub max: f32,
    pub next: u16,
    pub offset: u16,
    pub count: u16,
    pub is_leaf: u8,
    pub reserved: u8,
}

static_assertions::assert_eq_size!(LightTreeNode, [u8; 16]);

impl LightTreeNode {
    #[inline]
    pub fn contains(&self, depth: f32) -> bool {
        depth >= self.min && depth <= self.max
    }
}

/// Light tree over one froxel's lights.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LightTree {
    nodes: Vec<LightTreeNode>,
}

impl LightTree {
    /// Build the tree for `lights` (light indices) using `ranges[light]` as the
    /// `(min, max)` depth range of each light.
    ///
    /// Leaves are ordered by range minimum so neighbouring subtrees overlap little.
    pub fn build(lights: &[u8], ranges: &[Vec2]) -> Self {
        if lights.is_empty() {
            return Self::default();
        }

        let mut leaves: Vec<(u8, Vec2)> = lights
            .iter()
            .map(|&light| (light, ranges[light as usize]))
            .collect();
        leaves.sort_by(|a, b| a.1.x.total_cmp(&b.1.x).then(a.0.cmp(&b.0)));

        let width = leaves.len().next_power_of_two();
        let mut nodes = Vec::with_capacity(2 * width - 1);
        build_subtree(&mut nodes, &leaves, 0, width);
        debug_assert_eq!(nodes.len(), 2 * width - 1);
        Self { nodes }
    }

    #[inline]
    pub fn nodes(&self) -> &[LightTreeNode] {
        &self.nodes
    }

    #[inline]
    pub fn into_nodes(self) -> Vec<LightTreeNode> {
        self.nodes
    }

    /// Light indices whose range contains `depth`, in leaf order.
    pub fn query(nodes: &[LightTreeNode], depth: f32) -> Vec<u16> {
        let mut lights = Vec::new();
        let mut index = 0;
        while index < nodes.len() {
            let node = &nodes[index];
            if node.contains(depth) {
                if node.is_leaf != 0 {
                    lights.push(node.offset);
                }
                index += 1;
            } else {
                index = node.next as usize;
            }
        }
        lights
    }

    /// [`query`](Self::query) over this tree.
    pub fn lights_at(&self, depth: f32) -> Vec<u16> {
        Self::query(&self.nodes, depth)
    }
}

/// Append the subtree over leaf slots `[begin, end)` and return its range.
fn build_subtree(nodes: &mut Vec<LightTreeNode>, leaves: &[(u8, Vec2)], begin: usize, end: usize) -> Vec2 {
    let index = nodes.len();
    nodes.push(LightTreeNode::default());

    if end - begin == 1 {
        let (offset, count, range) = match leaves.get(begin) {
            Some(&(light, range)) => (light as u16, 1, range),
            None => (0, 0, Vec2::new(f32::INFINITY, f32::NEG_INFINITY)),
        };
        nodes[index] = LightTreeNode {
            min: range.x,
            max: range.y,
            next: (index + 1) as u16,
            offset,
            count,
            is_leaf: 1,
            reserved: 0,
        };
        return range;
    }

    let mid = begin + (end - begin) / 2;
    let left = build_subtree(nodes, leaves, begin, mid);
    let right = build_subtree(nodes, leaves, mid, end);
    let range = Vec2::new(left.x.min(right.x), left.y.max(right.y));
    nodes[index] = LightTreeNode {
        min: range.x,
        max: range.y,
        next: nodes.len() as u16,
        offset: begin as u16,
        count: (end - begin) as u16,
        is_leaf: 0,
        reserved: 0,
    };
    range
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges() -> Vec<Vec2> {
        vec![
            Vec2::new(0.10, 0.20),
            Vec2::new(0.15, 0.40),
            Vec2::new(0.50, 0.60),
            Vec2::new(0.55, 0.90),
            Vec2::new(0.05, 0.95),
        ]
    }

    #[test]
    fn test_node_size() {
        assert_eq!(std::mem::size_of::<LightTreeNode>(), 16);
    }

    #[test]
    fn test_empty_tree() {
        let tree = LightTree::build(&[], &ranges());
        assert!(tree.nodes().is_empty());
        assert!(tree.lights_at(0.5).is_empty());
    }

    #[test]
    fn test_single_light() {
        let tree = LightTree::build(&[2], &ranges());
        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.lights_at(0.55), vec![2]);
        assert!(tree.lights_at(0.7).is_empty());
    }

    #[test]
    fn test_padded_layout() {
        let tree = LightTree::build(&[0, 1, 2, 3, 4], &ranges());
        // 5 lights pad to 8 leaves
        assert_eq!(tree.nodes().len(), 15);
        let root = tree.nodes()[0];
        assert_eq!(root.next, 15);
        assert_eq!(root.count, 8);
        assert_eq!(root.min, 0.05);
        assert_eq!(root.max, 0.95);
        let leaves = tree.nodes().iter().filter(|n| n.is_leaf != 0).count();
        assert_eq!(leaves, 8);
        let padding = tree.nodes().iter().filter(|n| n.is_leaf != 0 && n.count == 0).count();
        assert_eq!(padding, 3);
    }

    #[test]
    fn test_query_matches_brute_force() {
        let ranges = ranges();
        let lights = [0u8, 1, 2, 3, 4];
        let tree = LightTree::build(&lights, &ranges);
        for step in 0..=100 {
            let depth = step as f32 / 100.0;
            let mut found = tree.lights_at(depth);
            found.sort_unstable();
            let expected: Vec<u16> = lights
                .iter()
                .filter(|&&l| depth >= ranges[l as usize].x && depth <= ranges[l as usize].y)
                .map(|&l| l as u16)
                .collect();
            assert_eq!(found, expected, "depth {}", depth);
        }
    }

    #[test]
    fn test_skip_pointers() {
        let tree = LightTree::build(&[0, 1, 2, 3], &ranges());
        let next: Vec<u16> = tree.nodes().iter().map(|n| n.next).collect();
        assert_eq!(next, vec![7, 4, 3, 4, 7, 6, 7]);
    }
}
