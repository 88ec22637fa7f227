//! Declared inputs of a test body.
//!
//! Instead of inspecting a callable at run time, each body is registered
//! with its [`Signature`]. [`Signature::argnames`] is the list of fixtures
//! the host must supply.

/// One declared parameter of a test body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter name, matching a fixture name.
    pub name: String,
    /// The body supplies its own value when the host does not.
    pub has_default: bool,
}

impl Param {
    /// A parameter the host must supply.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            has_default: false,
        }
    }

    /// A parameter with its own default.
    #[must_use]
    pub fn defaulted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            has_default: true,
        }
    }
}

/// The ordered parameter list of a test body.
///
/// # Example
///
/// ```rust
/// use looptest::signature::{Param, Signature};
///
/// let sig = Signature::function([Param::required("a"), Param::defaulted("b")]);
/// assert_eq!(sig.argnames(), vec!["a"]);
///
/// let method = Signature::method([Param::required("self"), Param::required("io_loop")]);
/// assert_eq!(method.argnames(), vec!["io_loop"]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    params: Vec<Param>,
    bound: bool,
}

impl Signature {
    /// Signature of a free function.
    #[must_use]
    pub fn function(params: impl IntoIterator<Item = Param>) -> Self {
        Self {
            params: params.into_iter().collect(),
            bound: false,
        }
    }

    /// Signature of a bound method; the first parameter is the receiver.
    #[must_use]
    pub fn method(params: impl IntoIterator<Item = Param>) -> Self {
        Self {
            params: params.into_iter().collect(),
            bound: true,
        }
    }

    /// Signature of a free function whose parameters are all required.
    #[must_use]
    pub fn required<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::function(names.into_iter().map(Param::required))
    }

    /// Returns every declared parameter, receiver included.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Returns `true` for a bound method.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Names the host must resolve, in declaration order.
    ///
    /// Skips the receiver of a bound method and every defaulted parameter.
    #[must_use]
    pub fn argnames(&self) -> Vec<&str> {
        let skip = usize::from(self.bound);
        self.params
            .iter()
            .skip(skip)
            .filter(|param| !param.has_default)
            .map(|param| param.name.as_str())
            .collect()
    }
}
