//! The arena-based builder for accelerator graph expressions.
//!
//! The builder owns every expression it creates and hands out cheap [`Node`]
//! handles. Each constructor performs full shape and type inference up front,
//! so a handle always refers to a well-formed expression with a known,
//! fully-resolved shape. Expressions are immutable once constructed; graph
//! rewrites happen by building new expressions, never by mutating old ones.

use std::fmt::{Display, Formatter};

use itertools::Itertools;
use karst_errors::build::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::types::{BinaryOp, Layout, Precision, Shape, TensorData, UnaryOp};

/// The index of an expression within the builder's arena.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    /// Returns the raw arena index of this identifier.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A handle to an expression in the accelerator graph IR.
///
/// Handles are tagged with the semantic precision and memory layout of the
/// value they compute, which converters check against kernel contracts
/// without having to consult the builder. The expression itself, and its
/// shape, live in the [`GraphBuilder`] that created the handle.
///
/// A `Node` is only ever created by a builder; holding one implies the
/// corresponding expression exists and passed shape inference.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Node {
    id: NodeId,
    precision: Precision,
    layout: Layout,
}

impl Node {
    /// Returns the identifier of the underlying expression.
    #[must_use]
    pub fn id(self) -> NodeId {
        self.id
    }

    /// Returns the semantic precision of the value this node computes.
    #[must_use]
    pub fn precision(self) -> Precision {
        self.precision
    }

    /// Returns the memory layout of the value this node computes.
    #[must_use]
    pub fn layout(self) -> Layout {
        self.layout
    }
}

/// One expression in the accelerator IR.
///
/// Operand references are [`NodeId`]s into the owning arena, keeping the
/// representation flat and serializable.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Expr {
    /// A placeholder for a value supplied at execution time.
    Input,

    /// A value embedded into the graph by copy.
    Constant {
        /// The embedded payload.
        data: TensorData,
    },

    /// A change of shape that preserves the element count and order.
    Reshape {
        /// The reshaped operand.
        src: NodeId,
    },

    /// A permutation of the operand's axes.
    Transpose {
        /// The transposed operand.
        src: NodeId,

        /// The axis permutation, in destination order.
        axes: Vec<usize>,
    },

    /// Row selection from a table by integer indices.
    Gather {
        /// The table rows are gathered from.
        table: NodeId,

        /// The integer indices to gather at.
        indices: NodeId,

        /// The table axis indexed by the indices.
        axis: usize,
    },

    /// A 2-D matrix product.
    Matmul {
        /// The left operand, of shape `[M, K]`.
        lhs: NodeId,

        /// The right operand, of shape `[K, N]` (`[N, K]` when
        /// `transpose_rhs` is set).
        rhs: NodeId,

        /// Whether the right operand is consumed transposed.
        transpose_rhs: bool,
    },

    /// A batched matrix product over rank-3 operands.
    ///
    /// See [`GraphBuilder::batch_matmul`] for the operand storage convention.
    BatchMatmul {
        /// The left operand, of shape `[B, M, K]`.
        lhs: NodeId,

        /// The right operand, of shape `[B', N, K]`.
        rhs: NodeId,
    },

    /// Multiplication of every element by a compile-time scalar.
    Scale {
        /// The scaled operand.
        src: NodeId,

        /// The scale factor.
        factor: f32,
    },

    /// An element-wise unary operation.
    Unary {
        /// The operand.
        src: NodeId,

        /// The operation applied to each element.
        op: UnaryOp,
    },

    /// The softmax function over one axis.
    Softmax {
        /// The operand.
        src: NodeId,

        /// The normalized (non-negative) axis softmax is taken over.
        axis: usize,
    },

    /// An element-wise binary operation over identically-shaped operands.
    Binary {
        /// The left operand.
        lhs: NodeId,

        /// The right operand.
        rhs: NodeId,

        /// The operation applied element-wise.
        op: BinaryOp,
    },
}

impl Expr {
    /// Returns the mnemonic used to render this expression.
    #[must_use]
    pub fn op_name(&self) -> &'static str {
        match self {
            Expr::Input => "input",
            Expr::Constant { .. } => "constant",
            Expr::Reshape { .. } => "reshape",
            Expr::Transpose { .. } => "transpose",
            Expr::Gather { .. } => "gather",
            Expr::Matmul { .. } => "matmul",
            Expr::BatchMatmul { .. } => "batch_matmul",
            Expr::Scale { .. } => "scale",
            Expr::Unary { op, .. } => match op {
                UnaryOp::Relu => "relu",
                UnaryOp::Sigmoid => "sigmoid",
                UnaryOp::Tanh => "tanh",
            },
            Expr::Softmax { .. } => "softmax",
            Expr::Binary { op, .. } => match op {
                BinaryOp::Add => "add",
                BinaryOp::Mul => "mul",
            },
        }
    }
}

/// One arena slot: an expression together with its inferred metadata.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
struct Slot {
    expr: Expr,
    shape: Shape,
    precision: Precision,
    layout: Layout,
}

/// Constructs and owns the expressions of one accelerator graph.
///
/// One builder corresponds to one subgraph handed to the accelerator's
/// compiler; independent subgraphs get independent builders and share no
/// state. The builder is strictly append-only: expressions are never removed
/// or rewritten, and every [`Node`] it has handed out stays valid for the
/// builder's lifetime.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct GraphBuilder {
    slots: Vec<Slot>,
}

impl GraphBuilder {
    /// Creates a new, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of expressions constructed so far.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the shape of the value computed by `node`.
    ///
    /// # Panics
    ///
    /// Panics if `node` was produced by a different builder. This is a
    /// programmer error.
    #[must_use]
    pub fn shape_of(&self, node: Node) -> &Shape {
        &self.slots[node.id.0].shape
    }

    /// Returns the expression behind `node`.
    ///
    /// # Panics
    ///
    /// Panics if `node` was produced by a different builder. This is a
    /// programmer error.
    #[must_use]
    pub fn expr_of(&self, node: Node) -> &Expr {
        &self.slots[node.id.0].expr
    }

    fn push(&mut self, expr: Expr, shape: Shape, precision: Precision, layout: Layout) -> Node {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot {
            expr,
            shape,
            precision,
            layout,
        });
        Node {
            id,
            precision,
            layout,
        }
    }

    /// Creates a placeholder for a value supplied at execution time.
    ///
    /// # Errors
    ///
    /// - [`Error::NonPositiveDim`] if any dimension of `shape` is not
    ///   strictly positive.
    pub fn input(&mut self, shape: Shape, precision: Precision, layout: Layout) -> Result<Node> {
        check_concrete(&shape)?;
        Ok(self.push(Expr::Input, shape, precision, layout))
    }

    /// Embeds a constant value into the graph by copy.
    ///
    /// The precision of the node is taken from the payload itself.
    ///
    /// # Errors
    ///
    /// - [`Error::NonPositiveDim`] if any dimension of `shape` is not
    ///   strictly positive.
    /// - [`Error::PayloadSizeMismatch`] if the payload's element count does
    ///   not fill `shape`.
    pub fn constant(&mut self, shape: Shape, layout: Layout, data: TensorData) -> Result<Node> {
        check_concrete(&shape)?;
        let expected = usize::try_from(shape.element_count()).unwrap_or(usize::MAX);
        if data.len() != expected {
            return Err(Error::PayloadSizeMismatch {
                actual: data.len(),
                shape: shape.to_string(),
            });
        }
        let precision = data.precision();
        Ok(self.push(Expr::Constant { data }, shape, precision, layout))
    }

    /// Reshapes `src` according to `spec`.
    ///
    /// The specification may contain at most one `-1` dimension, which is
    /// inferred from the operand's total element count; all other dimensions
    /// must be strictly positive. The resulting node carries the resolved
    /// shape.
    ///
    /// # Errors
    ///
    /// - [`Error::MultipleInferredDims`] if `spec` contains more than one
    ///   `-1`.
    /// - [`Error::NonPositiveDim`] if `spec` contains a dimension that is
    ///   neither `-1` nor strictly positive.
    /// - [`Error::ElementCountMismatch`] if the operand's elements cannot
    ///   fill the specified shape exactly.
    pub fn reshape(&mut self, src: Node, spec: &[i64]) -> Result<Node> {
        let shape = resolve_reshape(self.shape_of(src), spec)?;
        Ok(self.push(
            Expr::Reshape { src: src.id },
            shape,
            src.precision,
            src.layout,
        ))
    }

    /// Permutes the axes of `src` into the order given by `axes`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPermutation`] if `axes` is not a permutation of the
    ///   operand's axes.
    pub fn transpose(&mut self, src: Node, axes: &[usize]) -> Result<Node> {
        let src_shape = self.shape_of(src);
        let rank = src_shape.rank();
        let mut seen = vec![false; rank];
        for &axis in axes {
            if axis >= rank || seen[axis] {
                return Err(Error::InvalidPermutation {
                    axes: axes.to_vec(),
                    rank,
                });
            }
            seen[axis] = true;
        }
        if axes.len() != rank {
            return Err(Error::InvalidPermutation {
                axes: axes.to_vec(),
                rank,
            });
        }
        let dims = axes.iter().map(|&a| src_shape.dims()[a]).collect();
        Ok(self.push(
            Expr::Transpose {
                src: src.id,
                axes: axes.to_vec(),
            },
            Shape::new(dims),
            src.precision,
            src.layout,
        ))
    }

    /// Gathers rows of `table` at the positions given by `indices`.
    ///
    /// The accelerator's gather primitive only indexes the leading axis, so
    /// `axis` must be 0. The result has shape
    /// `indices.shape ++ table.shape[1..]` and takes its precision and
    /// layout from the table.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedAxis`] if `axis` is not 0.
    /// - [`Error::RankMismatch`] if `table` is rank 0.
    pub fn gather(&mut self, table: Node, indices: Node, axis: usize) -> Result<Node> {
        let table_shape = self.shape_of(table);
        if table_shape.rank() == 0 {
            return Err(Error::RankMismatch {
                op: "gather",
                expected: 1,
                actual: 0,
            });
        }
        if axis != 0 {
            #[allow(clippy::cast_possible_wrap)] // Ranks are tiny.
            return Err(Error::UnsupportedAxis {
                op: "gather",
                axis: axis as i64,
                rank: table_shape.rank(),
            });
        }
        let mut dims = self.shape_of(indices).dims().to_vec();
        dims.extend_from_slice(&table_shape.dims()[1..]);
        let precision = table.precision;
        let layout = table.layout;
        Ok(self.push(
            Expr::Gather {
                table: table.id,
                indices: indices.id,
                axis,
            },
            Shape::new(dims),
            precision,
            layout,
        ))
    }

    /// Multiplies two matrices.
    ///
    /// `lhs` must have shape `[M, K]`. When `transpose_rhs` is unset, `rhs`
    /// must have shape `[K, N]`; when set, `[N, K]`. The result has shape
    /// `[M, N]`.
    ///
    /// # Errors
    ///
    /// - [`Error::RankMismatch`] if either operand is not rank 2.
    /// - [`Error::ShapeMismatch`] if the contracted extents differ.
    pub fn matmul(&mut self, lhs: Node, rhs: Node, transpose_rhs: bool) -> Result<Node> {
        let lhs_shape = self.shape_of(lhs).clone();
        let rhs_shape = self.shape_of(rhs).clone();
        for shape in [&lhs_shape, &rhs_shape] {
            if shape.rank() != 2 {
                return Err(Error::RankMismatch {
                    op: "matmul",
                    expected: 2,
                    actual: shape.rank(),
                });
            }
        }
        let (m, k_lhs) = (lhs_shape.dims()[0], lhs_shape.dims()[1]);
        let (k_rhs, n) = if transpose_rhs {
            (rhs_shape.dims()[1], rhs_shape.dims()[0])
        } else {
            (rhs_shape.dims()[0], rhs_shape.dims()[1])
        };
        if k_lhs != k_rhs {
            return Err(Error::ShapeMismatch {
                op: "matmul",
                lhs: lhs_shape.to_string(),
                rhs: rhs_shape.to_string(),
            });
        }
        Ok(self.push(
            Expr::Matmul {
                lhs: lhs.id,
                rhs: rhs.id,
                transpose_rhs,
            },
            Shape::new(vec![m, n]),
            lhs.precision,
            lhs.layout,
        ))
    }

    /// Multiplies two batches of matrices.
    ///
    /// # Operand Storage Convention
    ///
    /// The accelerator's batched-multiply primitive consumes its right
    /// operand **row-transposed**: for `lhs` of shape `[B, M, K]` the right
    /// operand must have shape `[B', N, K]`, and the contraction runs over
    /// the trailing `K` axis of both. Callers holding a `[B', K, N]` value
    /// must insert a [`Self::transpose`] before the multiply. The batch
    /// extents broadcast when either is 1; the result has shape
    /// `[max(B, B'), M, N]`.
    ///
    /// # Errors
    ///
    /// - [`Error::RankMismatch`] if either operand is not rank 3.
    /// - [`Error::ShapeMismatch`] if the contracted extents differ or the
    ///   batch extents cannot broadcast.
    pub fn batch_matmul(&mut self, lhs: Node, rhs: Node) -> Result<Node> {
        let lhs_shape = self.shape_of(lhs).clone();
        let rhs_shape = self.shape_of(rhs).clone();
        for shape in [&lhs_shape, &rhs_shape] {
            if shape.rank() != 3 {
                return Err(Error::RankMismatch {
                    op: "batch_matmul",
                    expected: 3,
                    actual: shape.rank(),
                });
            }
        }
        let [b_lhs, m, k_lhs] = lhs_shape.dims() else {
            unreachable!("rank checked above")
        };
        let [b_rhs, n, k_rhs] = rhs_shape.dims() else {
            unreachable!("rank checked above")
        };
        let mismatch = || Error::ShapeMismatch {
            op: "batch_matmul",
            lhs: lhs_shape.to_string(),
            rhs: rhs_shape.to_string(),
        };
        if k_lhs != k_rhs {
            return Err(mismatch());
        }
        let batch = if b_lhs == b_rhs {
            *b_lhs
        } else if *b_lhs == 1 {
            *b_rhs
        } else if *b_rhs == 1 {
            *b_lhs
        } else {
            return Err(mismatch());
        };
        Ok(self.push(
            Expr::BatchMatmul {
                lhs: lhs.id,
                rhs: rhs.id,
            },
            Shape::new(vec![batch, *m, *n]),
            lhs.precision,
            lhs.layout,
        ))
    }

    /// Multiplies every element of `src` by the compile-time scalar `factor`.
    ///
    /// # Errors
    ///
    /// This constructor is infallible in practice but returns [`Result`] for
    /// uniformity with the other constructors.
    pub fn scale(&mut self, src: Node, factor: f32) -> Result<Node> {
        let shape = self.shape_of(src).clone();
        Ok(self.push(
            Expr::Scale {
                src: src.id,
                factor,
            },
            shape,
            src.precision,
            src.layout,
        ))
    }

    /// Applies the element-wise unary operation `op` to `src`.
    ///
    /// # Errors
    ///
    /// This constructor is infallible in practice but returns [`Result`] for
    /// uniformity with the other constructors.
    pub fn unary(&mut self, src: Node, op: UnaryOp) -> Result<Node> {
        let shape = self.shape_of(src).clone();
        Ok(self.push(
            Expr::Unary { src: src.id, op },
            shape,
            src.precision,
            src.layout,
        ))
    }

    /// Applies softmax over `axis` of `src`.
    ///
    /// A negative `axis` counts from the back, as in the usual host-engine
    /// convention.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedAxis`] if `axis` does not name an axis of the
    ///   operand.
    pub fn softmax(&mut self, src: Node, axis: i64) -> Result<Node> {
        let shape = self.shape_of(src).clone();
        let axis = normalize_axis("softmax", axis, shape.rank())?;
        Ok(self.push(
            Expr::Softmax { src: src.id, axis },
            shape,
            src.precision,
            src.layout,
        ))
    }

    /// Applies the element-wise binary operation `op` to two
    /// identically-shaped operands.
    ///
    /// # Errors
    ///
    /// - [`Error::ShapeMismatch`] if the operand shapes differ. Broadcasting
    ///   is the caller's responsibility.
    pub fn binary(&mut self, lhs: Node, rhs: Node, op: BinaryOp) -> Result<Node> {
        let lhs_shape = self.shape_of(lhs).clone();
        let rhs_shape = self.shape_of(rhs);
        if lhs_shape != *rhs_shape {
            return Err(Error::ShapeMismatch {
                op: match op {
                    BinaryOp::Add => "add",
                    BinaryOp::Mul => "mul",
                },
                lhs: lhs_shape.to_string(),
                rhs: rhs_shape.to_string(),
            });
        }
        Ok(self.push(
            Expr::Binary {
                lhs: lhs.id,
                rhs: rhs.id,
                op,
            },
            lhs_shape,
            lhs.precision,
            lhs.layout,
        ))
    }
}

/// Renders the arena in SSA style, one expression per line.
impl Display for GraphBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, slot) in self.slots.iter().enumerate() {
            let operands = match &slot.expr {
                Expr::Input | Expr::Constant { .. } => String::new(),
                Expr::Reshape { src } | Expr::Scale { src, .. } | Expr::Unary { src, .. } => {
                    src.to_string()
                }
                Expr::Transpose { src, axes } => {
                    format!("{src}, axes = [{}]", axes.iter().join(", "))
                }
                Expr::Gather {
                    table,
                    indices,
                    axis,
                } => format!("{table}, {indices}, axis = {axis}"),
                Expr::Matmul {
                    lhs,
                    rhs,
                    transpose_rhs,
                } => format!("{lhs}, {rhs}, transpose_rhs = {transpose_rhs}"),
                Expr::BatchMatmul { lhs, rhs } | Expr::Binary { lhs, rhs, .. } => {
                    format!("{lhs}, {rhs}")
                }
                Expr::Softmax { src, axis } => format!("{src}, axis = {axis}"),
            };
            let extra = match &slot.expr {
                Expr::Scale { factor, .. } => format!(" * {factor}"),
                _ => String::new(),
            };
            writeln!(
                f,
                "%{i} = {}({operands}){extra} : {}{}",
                slot.expr.op_name(),
                slot.precision,
                slot.shape
            )?;
        }
        Ok(())
    }
}

/// Checks that every dimension of an externally-provided shape is strictly
/// positive.
fn check_concrete(shape: &Shape) -> Result<()> {
    for &dim in shape.dims() {
        if dim < 1 {
            return Err(Error::NonPositiveDim(dim));
        }
    }
    Ok(())
}

/// Resolves a reshape specification against the operand's shape, inferring
/// at most one `-1` dimension from the element count.
fn resolve_reshape(src: &Shape, spec: &[i64]) -> Result<Shape> {
    let render = || format!("[{}]", spec.iter().join(", "));
    let elements = src.element_count();
    let mut inferred = None;
    let mut known: i64 = 1;
    for (position, &dim) in spec.iter().enumerate() {
        if dim == -1 {
            if inferred.is_some() {
                return Err(Error::MultipleInferredDims(render()));
            }
            inferred = Some(position);
        } else if dim < 1 {
            return Err(Error::NonPositiveDim(dim));
        } else {
            known *= dim;
        }
    }
    let mut dims = spec.to_vec();
    if let Some(position) = inferred {
        if known == 0 || elements % known != 0 {
            return Err(Error::ElementCountMismatch {
                elements,
                spec: render(),
            });
        }
        dims[position] = elements / known;
    } else if known != elements {
        return Err(Error::ElementCountMismatch {
            elements,
            spec: render(),
        });
    }
    Ok(Shape::new(dims))
}

/// Normalizes a possibly-negative axis against `rank`.
fn normalize_axis(op: &'static str, axis: i64, rank: usize) -> Result<usize> {
    #[allow(clippy::cast_possible_wrap)] // Ranks are tiny.
    let rank_i = rank as i64;
    let resolved = if axis < 0 { axis + rank_i } else { axis };
    if resolved < 0 || resolved >= rank_i {
        return Err(Error::UnsupportedAxis { op, axis, rank });
    }
    #[allow(clippy::cast_sign_loss)] // Checked non-negative above.
    Ok(resolved as usize)
}
