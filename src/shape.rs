//! Dimension descriptors resolved at initialization time.
//!
//! A [`Shape`] is a `height × width × depth` triple in which each component is
//! either fixed at construction or [`Dim::Dynamic`] until the chain supplies
//! enough information (a neighbouring layer's shape or a sample length) to bind
//! it. Once every component is fixed the shape never changes for the lifetime of
//! the layer that holds it.

use crate::error::{NetError, NetResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One dimension of a [`Shape`].
///
/// Serialized as a positive integer, or `null` for a dynamic dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Option<usize>", into = "Option<usize>")]
pub enum Dim {
    /// Known, strictly positive extent.
    Fixed(usize),
    /// Resolved later from a neighbouring layer or from data.
    Dynamic,
}

impl Dim {
    /// Returns the fixed value, or `None` while dynamic.
    pub fn value(self) -> Option<usize> {
        match self {
            Dim::Fixed(n) => Some(n),
            Dim::Dynamic => None,
        }
    }

    pub fn is_dynamic(self) -> bool {
        matches!(self, Dim::Dynamic)
    }

    /// Combines two declarations of the same dimension.
    ///
    /// A dynamic side defers to the other one; two fixed sides must agree.
    ///
    /// # Examples
    ///
    /// ```
    /// use neural_layers::shape::Dim;
    ///
    /// assert_eq!(Dim::Dynamic.resolve(Dim::Fixed(4), "rows").unwrap(), Dim::Fixed(4));
    /// assert!(Dim::Fixed(3).resolve(Dim::Fixed(4), "rows").is_err());
    /// ```
    pub fn resolve(self, other: Dim, context: &str) -> NetResult<Dim> {
        match (self, other) {
            (Dim::Dynamic, d) | (d, Dim::Dynamic) => Ok(d),
            (Dim::Fixed(a), Dim::Fixed(b)) if a == b => Ok(Dim::Fixed(a)),
            (Dim::Fixed(a), Dim::Fixed(b)) => Err(NetError::shape_mismatch(context, a, b)),
        }
    }

    /// Binds the dimension to a concrete data size.
    ///
    /// Binding is allowed once: a fixed dimension only accepts its own value.
    pub fn bind(self, value: usize, context: &str) -> NetResult<Dim> {
        self.resolve(Dim::Fixed(value), context)
    }

    /// Rejects a zero extent; `name` identifies the dimension in the error.
    pub fn validate(self, name: &str) -> NetResult<()> {
        match self {
            Dim::Fixed(0) => Err(NetError::InvalidConfig(format!(
                "{} must be positive or dynamic",
                name
            ))),
            _ => Ok(()),
        }
    }
}

impl From<usize> for Dim {
    fn from(n: usize) -> Self {
        Dim::Fixed(n)
    }
}

impl TryFrom<Option<usize>> for Dim {
    type Error = String;

    fn try_from(value: Option<usize>) -> Result<Self, Self::Error> {
        match value {
            Some(0) => Err("dimensions must be positive or null".to_string()),
            Some(n) => Ok(Dim::Fixed(n)),
            None => Ok(Dim::Dynamic),
        }
    }
}

impl From<Dim> for Option<usize> {
    fn from(dim: Dim) -> Self {
        dim.value()
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{}", n),
            Dim::Dynamic => write!(f, "?"),
        }
    }
}

fn unit_dim() -> Dim {
    Dim::Fixed(1)
}

/// Fully resolved extents of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dims {
    pub height: usize,
    pub width: usize,
    pub depth: usize,
}

impl Dims {
    pub fn new(height: usize, width: usize, depth: usize) -> Self {
        Self {
            height,
            width,
            depth,
        }
    }

    /// Total number of scalars in the volume.
    pub fn size(&self) -> usize {
        self.height * self.width * self.depth
    }
}

impl fmt::Display for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} x {} x {})", self.height, self.width, self.depth)
    }
}

/// Possibly-dynamic `height × width × depth` descriptor.
///
/// Vectors are shapes with `width == depth == 1`. In JSON, `width` and `depth`
/// default to 1 when omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub height: Dim,
    #[serde(default = "unit_dim")]
    pub width: Dim,
    #[serde(default = "unit_dim")]
    pub depth: Dim,
}

impl Shape {
    /// Fully fixed volume shape.
    pub fn new(height: usize, width: usize, depth: usize) -> Self {
        Self {
            height: Dim::Fixed(height),
            width: Dim::Fixed(width),
            depth: Dim::Fixed(depth),
        }
    }

    /// Column vector of `n` elements.
    pub fn vector(n: usize) -> Self {
        Self::new(n, 1, 1)
    }

    /// Vector whose length is resolved later.
    pub fn dynamic_vector() -> Self {
        Self {
            height: Dim::Dynamic,
            width: Dim::Fixed(1),
            depth: Dim::Fixed(1),
        }
    }

    /// Shape with every component dynamic.
    pub fn dynamic() -> Self {
        Self {
            height: Dim::Dynamic,
            width: Dim::Dynamic,
            depth: Dim::Dynamic,
        }
    }

    fn components(&self) -> [Dim; 3] {
        [self.height, self.width, self.depth]
    }

    /// Returns true once no component is dynamic.
    pub fn is_resolved(&self) -> bool {
        self.components().iter().all(|d| !d.is_dynamic())
    }

    /// Product of all components, or `None` while any is dynamic.
    pub fn size(&self) -> Option<usize> {
        self.dims().map(|d| d.size())
    }

    pub fn dims(&self) -> Option<Dims> {
        match (self.height, self.width, self.depth) {
            (Dim::Fixed(h), Dim::Fixed(w), Dim::Fixed(d)) => Some(Dims::new(h, w, d)),
            _ => None,
        }
    }

    /// Rejects zero extents in any component.
    pub fn validate(&self, name: &str) -> NetResult<()> {
        self.height.validate(&format!("{} height", name))?;
        self.width.validate(&format!("{} width", name))?;
        self.depth.validate(&format!("{} depth", name))
    }

    /// Like [`Shape::dims`], failing with `NotInitializable` on behalf of
    /// `layer` while a component is dynamic or zero.
    pub fn require_dims(&self, layer: &str) -> NetResult<Dims> {
        let dims = self.dims().ok_or_else(|| {
            NetError::not_initializable(layer, format!("shape {} is not fully resolved", self))
        })?;
        if dims.size() == 0 {
            return Err(NetError::not_initializable(
                layer,
                format!("shape {} has a zero extent", self),
            ));
        }
        Ok(dims)
    }

    /// Component-wise [`Dim::resolve`].
    pub fn resolve(&self, other: &Shape, context: &str) -> NetResult<Shape> {
        // Report the whole shapes rather than the first conflicting component.
        match (
            self.height.resolve(other.height, context),
            self.width.resolve(other.width, context),
            self.depth.resolve(other.depth, context),
        ) {
            (Ok(height), Ok(width), Ok(depth)) => Ok(Shape {
                height,
                width,
                depth,
            }),
            _ => Err(NetError::shape_mismatch(context, self, other)),
        }
    }

    /// Binds dynamic components from the length of a flat data vector.
    ///
    /// - a resolved shape accepts only its own size;
    /// - a fully dynamic shape becomes the vector `(len, 1, 1)`;
    /// - a single dynamic component is `len` divided by the fixed components;
    /// - several dynamic components next to fixed ones cannot be bound.
    ///
    /// # Examples
    ///
    /// ```
    /// use neural_layers::shape::{Dim, Shape};
    ///
    /// let shape = Shape { height: Dim::Dynamic, width: Dim::Fixed(2), depth: Dim::Fixed(1) };
    /// assert_eq!(shape.bind_len(6, "input").unwrap(), Shape::new(3, 2, 1));
    /// assert!(Shape::new(3, 2, 1).bind_len(7, "input").is_err());
    /// ```
    pub fn bind_len(&self, len: usize, context: &str) -> NetResult<Shape> {
        if let Some(size) = self.size() {
            if size == len {
                return Ok(*self);
            }
            return Err(NetError::shape_mismatch(context, size, len));
        }

        let components = self.components();
        let dynamic_count = components.iter().filter(|d| d.is_dynamic()).count();
        if dynamic_count == 3 {
            if len == 0 {
                return Err(NetError::shape_mismatch(context, "a non-empty sample", len));
            }
            return Ok(Shape::vector(len));
        }
        if dynamic_count > 1 {
            return Err(NetError::not_initializable(
                context,
                format!("cannot bind {} dynamic dimensions of {} from a flat length", dynamic_count, self),
            ));
        }

        let fixed: usize = components.iter().filter_map(|d| d.value()).product();
        if len == 0 || len % fixed != 0 {
            return Err(NetError::shape_mismatch(
                context,
                format!("a multiple of {}", fixed),
                len,
            ));
        }
        let bound = Dim::Fixed(len / fixed);
        let pick = |d: Dim| if d.is_dynamic() { bound } else { d };
        Ok(Shape {
            height: pick(self.height),
            width: pick(self.width),
            depth: pick(self.depth),
        })
    }
}

impl From<Dims> for Shape {
    fn from(d: Dims) -> Self {
        Shape::new(d.height, d.width, d.depth)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} x {} x {})", self.height, self.width, self.depth)
    }
}
