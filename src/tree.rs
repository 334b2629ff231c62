use rand::rngs::StdRng;
use rand::seq::SliceRandom;

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub min_child_weight: f64,
    pub lambda: f64,
    /// Candidate features drawn per split; `None` tries every feature.
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone)]
enum Node {
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

#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct GrowCtx<'a> {
    x: &'a [Vec<f64>],
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    params: TreeParams,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Grows a tree over `rows` (indices into `x`, repeats allowed) using
    /// only the columns in `features`.
    pub fn fit(
        x: &[Vec<f64>],
        grad: &[f64],
        hess: &[f64],
        rows: &[usize],
        features: &[usize],
        params: TreeParams,
        rng: &mut StdRng,
    ) -> Self {
        let ctx = GrowCtx {
            x,
            grad,
            hess,
            features,
            params,
        };
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(&ctx, rows.to_vec(), 0, rng);
        tree
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
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
                    let v = x.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    fn grow(&mut self, ctx: &GrowCtx<'_>, rows: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let idx = self.nodes.len();
        let (g, h) = sums(ctx, &rows);
        self.nodes.push(Node::Leaf {
            value: leaf_value(g, h, ctx.params.lambda),
        });

        if depth >= ctx.params.max_depth || rows.len() < ctx.params.min_samples_split.max(2) {
            return idx;
        }
        let Some(best) = best_split(ctx, &rows, g, h, rng) else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|r| ctx.x[*r][best.feature] <= best.threshold);
        let left = self.grow(ctx, left_rows, depth + 1, rng);
        let right = self.grow(ctx, right_rows, depth + 1, rng);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        idx
    }
}

fn best_split(
    ctx: &GrowCtx<'_>,
    rows: &[usize],
    g_total: f64,
    h_total: f64,
    rng: &mut StdRng,
) -> Option<Candidate> {
    let p = &ctx.params;
    let mut candidates = ctx.features.to_vec();
    if let Some(k) = p.max_features
        && k < candidates.len()
    {
        candidates.shuffle(rng);
        candidates.truncate(k.max(1));
        candidates.sort_unstable();
    }

    let parent = score(g_total, h_total, p.lambda);
    let min_leaf = p.min_samples_leaf.max(1);
    let mut best: Option<Candidate> = None;
    let mut sorted = rows.to_vec();

    for &feature in &candidates {
        sorted.sort_by(|a, b| ctx.x[*a][feature].total_cmp(&ctx.x[*b][feature]));
        let mut g_left = 0.0;
        let mut h_left = 0.0;
        for i in 0..sorted.len() - 1 {
            let r = sorted[i];
            g_left += ctx.grad[r];
            h_left += ctx.hess[r];

            let n_left = i + 1;
            let n_right = sorted.len() - n_left;
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }
            let v = ctx.x[r][feature];
            let v_next = ctx.x[sorted[i + 1]][feature];
            if v_next <= v {
                continue;
            }
            let g_right = g_total - g_left;
            let h_right = h_total - h_left;
            if h_left < p.min_child_weight || h_right < p.min_child_weight {
                continue;
            }

            let gain = score(g_left, h_left, p.lambda) + score(g_right, h_right, p.lambda) - parent;
            if gain > 1e-12 && best.is_none_or(|b| gain > b.gain) {
                best = Some(Candidate {
                    feature,
                    threshold: 0.5 * (v + v_next),
                    gain,
                });
            }
        }
    }
    best
}

fn sums(ctx: &GrowCtx<'_>, rows: &[usize]) -> (f64, f64) {
    rows.iter()
        .fold((0.0, 0.0), |(g, h), r| (g + ctx.grad[*r], h + ctx.hess[*r]))
}

fn score(g: f64, h: f64, lambda: f64) -> f64 {
    let den = h + lambda;
    if den <= 0.0 { 0.0 } else { g * g / den }
}

fn leaf_value(g: f64, h: f64, lambda: f64) -> f64 {
    let den = h + lambda;
    if den <= 0.0 { 0.0 } else { -g / den }
}
