//! ═══════════════════════════════════════════════════════════════════════════════
//! TREE — Histogram CART on Gradient Statistics
//! ═══════════════════════════════════════════════════════════════════════════════
//! Features are cut into ≤ `max_bins` quantile bins once per fit. A tree node
//! accumulates (Σg, Σh, n) per bin and scans prefixes for the best split:
//!
//! ```text
//!   gain = G_L²/(H_L+λ) + G_R²/(H_R+λ) − G²/(H+λ)
//!   leaf = G/(H+λ)
//! ```
//!
//! Bin `b` of a column holds values in `(edges[b-1], edges[b]]`, so the raw
//! split `x <= edges[b]` routes exactly the rows with `bin <= b`.
//! ═══════════════════════════════════════════════════════════════════════════════

use serde::{Deserialize, Serialize};

use crate::stats::float_cmp;

// ═══════════════════════════════════════════════════════════════════════════════
// BINNING
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-column cut points
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BinMapper {
    edges: Vec<Vec<f64>>,
}

impl BinMapper {
    /// Midpoints between distinct values when they fit, quantiles otherwise
    pub fn fit(rows: &[Vec<f64>], max_bins: usize) -> Self {
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let max_bins = max_bins.max(2);
        let edges = (0..width)
            .map(|col| {
                let mut values: Vec<f64> = rows
                    .iter()
                    .map(|r| r[col])
                    .filter(|v| v.is_finite())
                    .collect();
                values.sort_by(float_cmp);
                values.dedup();
                if values.len() <= max_bins {
                    values.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect()
                } else {
                    let mut cuts: Vec<f64> = (1..max_bins)
                        .map(|k| values[k * values.len() / max_bins])
                        .collect();
                    cuts.dedup();
                    cuts
                }
            })
            .collect();
        Self { edges }
    }

    pub fn width(&self) -> usize {
        self.edges.len()
    }

    pub fn n_bins(&self, col: usize) -> usize {
        self.edges[col].len() + 1
    }

    pub fn edge(&self, col: usize, bin: usize) -> f64 {
        self.edges[col][bin]
    }

    pub fn bin(&self, col: usize, x: f64) -> usize {
        self.edges[col].partition_point(|&e| e < x)
    }

    /// Column-major bin matrix
    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<u16>> {
        (0..self.width())
            .map(|col| rows.iter().map(|r| self.bin(col, r[col]) as u16).collect())
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TREE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub l2_regularization: f64,
}

/// One fitted regression tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let x = row.get(*feature).copied().unwrap_or(0.0);
                    idx = if x <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }

    /// Fit on gradient/hessian statistics over the given rows
    pub fn fit(
        mapper: &BinMapper,
        bins: &[Vec<u16>],
        grad: &[f64],
        hess: &[f64],
        rows: Vec<usize>,
        params: &TreeParams,
    ) -> Self {
        let mut builder = Builder {
            mapper,
            bins,
            grad,
            hess,
            params,
            nodes: Vec::new(),
        };
        builder.grow(rows, 0);
        Self { nodes: builder.nodes }
    }
}

struct Builder<'a> {
    mapper: &'a BinMapper,
    bins: &'a [Vec<u16>],
    grad: &'a [f64],
    hess: &'a [f64],
    params: &'a TreeParams,
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    bin: usize,
    gain: f64,
}

impl Builder<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let idx = self.nodes.len();
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();
        let lambda = self.params.l2_regularization;
        self.nodes.push(Node::Leaf { value: g / (h + lambda) });

        if depth >= self.params.max_depth || rows.len() < self.params.min_samples_split {
            return idx;
        }
        let Some(best) = self.best_split(&rows, g, h) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.bins[best.feature][r] as usize <= best.bin);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: self.mapper.edge(best.feature, best.bin),
            left,
            right,
        };
        idx
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<BestSplit> {
        let lambda = self.params.l2_regularization;
        let min_leaf = self.params.min_samples_leaf.max(1);
        let parent = g * g / (h + lambda);
        let mut best: Option<BestSplit> = None;

        for feature in 0..self.mapper.width() {
            let n_bins = self.mapper.n_bins(feature);
            if n_bins < 2 {
                continue;
            }
            let mut hist = vec![(0.0_f64, 0.0_f64, 0_usize); n_bins];
            for &r in rows {
                let slot = &mut hist[self.bins[feature][r] as usize];
                slot.0 += self.grad[r];
                slot.1 += self.hess[r];
                slot.2 += 1;
            }

            let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0);
            for (bin, &(bg, bh, bn)) in hist.iter().enumerate().take(n_bins - 1) {
                gl += bg;
                hl += bh;
                nl += bn;
                let nr = rows.len() - nl;
                if nl < min_leaf || nr < min_leaf {
                    continue;
                }
                let gr = g - gl;
                let hr = h - hl;
                let gain = gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent;
                let improves = best.as_ref().map_or(true, |b| gain > b.gain);
                if gain.is_finite() && gain > 1e-12 && improves {
                    best = Some(BestSplit { feature, bin, gain });
                }
            }
        }
        best
    }
}
