//! Cross-section geometry for conduits
//!
//! Every conduit carries a cross section that maps between flow depth,
//! flow area, and section factor:
//!
//! - **Area of depth** `A(y)`: wetted area at depth `y`
//! - **Depth of area** `y(A)`: inverse of the above
//! - **Area of section factor** `A(s)`: area at which `A·R^(2/3)` equals `s`,
//!   used to invert Manning's equation from flow to area
//!
//! All three mappings are monotone on `[0, y_full]`. Shapes without a
//! closed-form inverse are solved by bisection.

use serde::{Deserialize, Serialize};

/// Gravitational acceleration (ft/s²)
pub const GRAVITY: f64 = 32.17;

/// Relative tolerance for bisection inversions
const INVERT_TOL: f64 = 1e-6;

/// Maximum bisection iterations
const INVERT_MAX_ITER: usize = 60;

/// Conduit cross-section shape
///
/// Dimensions are in feet. `Dummy` is a zero-geometry section used for
/// idealized links that convey flow without hydraulics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "shape", rename_all = "kebab-case")]
pub enum XsectShape {
    /// No geometry; passes flow through untouched
    Dummy,

    /// Circular pipe
    Circular {
        /// Pipe diameter (ft)
        diameter: f64,
    },

    /// Closed rectangular box
    RectClosed {
        /// Box width (ft)
        width: f64,
        /// Box height (ft)
        height: f64,
    },

    /// Open rectangular channel
    RectOpen {
        /// Channel width (ft)
        width: f64,
        /// Channel height (ft)
        height: f64,
    },

    /// Trapezoidal channel
    Trapezoidal {
        /// Bottom width (ft)
        #[serde(rename = "bottomWidth")]
        bottom_width: f64,
        /// Channel height (ft)
        height: f64,
        /// Side slope (horizontal run per unit rise)
        #[serde(rename = "sideSlope")]
        side_slope: f64,
    },

    /// Triangular channel
    Triangular {
        /// Channel height (ft)
        height: f64,
        /// Side slope (horizontal run per unit rise)
        #[serde(rename = "sideSlope")]
        side_slope: f64,
    },
}

impl XsectShape {
    /// Full (maximum) flow depth (ft)
    pub fn y_full(&self) -> f64 {
        match *self {
            XsectShape::Dummy => 0.0,
            XsectShape::Circular { diameter } => diameter,
            XsectShape::RectClosed { height, .. }
            | XsectShape::RectOpen { height, .. }
            | XsectShape::Trapezoidal { height, .. }
            | XsectShape::Triangular { height, .. } => height,
        }
    }

    /// Flow area when running full (sq ft)
    pub fn a_full(&self) -> f64 {
        self.area_of_depth(self.y_full())
    }

    /// Hydraulic radius when running full (ft)
    pub fn r_full(&self) -> f64 {
        self.radius_of_depth(self.y_full())
    }

    /// Section factor `A·R^(2/3)` when running full
    pub fn s_full(&self) -> f64 {
        let a = self.a_full();
        if a <= 0.0 {
            return 0.0;
        }
        a * self.r_full().powf(2.0 / 3.0)
    }

    /// Wetted area at depth `y` (sq ft)
    pub fn area_of_depth(&self, y: f64) -> f64 {
        let y = y.clamp(0.0, self.y_full());
        match *self {
            XsectShape::Dummy => 0.0,
            XsectShape::Circular { diameter } => {
                let r = diameter / 2.0;
                if y <= 0.0 {
                    return 0.0;
                }
                if y >= diameter {
                    return std::f64::consts::PI * r * r;
                }
                let theta = 2.0 * ((r - y) / r).acos();
                (r * r / 2.0) * (theta - theta.sin())
            }
            XsectShape::RectClosed { width, .. } | XsectShape::RectOpen { width, .. } => width * y,
            XsectShape::Trapezoidal {
                bottom_width,
                side_slope,
                ..
            } => y * (bottom_width + side_slope * y),
            XsectShape::Triangular { side_slope, .. } => side_slope * y * y,
        }
    }

    /// Wetted perimeter at depth `y` (ft)
    pub fn perimeter_of_depth(&self, y: f64) -> f64 {
        let y = y.clamp(0.0, self.y_full());
        match *self {
            XsectShape::Dummy => 0.0,
            XsectShape::Circular { diameter } => {
                let r = diameter / 2.0;
                if y <= 0.0 {
                    return 0.0;
                }
                if y >= diameter {
                    return std::f64::consts::PI * diameter;
                }
                let theta = 2.0 * ((r - y) / r).acos();
                r * theta
            }
            XsectShape::RectClosed { width, height } => {
                if y >= height {
                    2.0 * (width + height)
                } else {
                    width + 2.0 * y
                }
            }
            XsectShape::RectOpen { width, .. } => width + 2.0 * y,
            XsectShape::Trapezoidal {
                bottom_width,
                side_slope,
                ..
            } => bottom_width + 2.0 * y * (1.0 + side_slope * side_slope).sqrt(),
            XsectShape::Triangular { side_slope, .. } => {
                2.0 * y * (1.0 + side_slope * side_slope).sqrt()
            }
        }
    }

    /// Hydraulic radius `A/P` at depth `y` (ft)
    pub fn radius_of_depth(&self, y: f64) -> f64 {
        let p = self.perimeter_of_depth(y);
        if p <= 0.0 {
            return 0.0;
        }
        self.area_of_depth(y) / p
    }

    /// Water surface top width at depth `y` (ft)
    pub fn width_of_depth(&self, y: f64) -> f64 {
        let y = y.clamp(0.0, self.y_full());
        match *self {
            XsectShape::Dummy => 0.0,
            XsectShape::Circular { diameter } => {
                let r = diameter / 2.0;
                if y <= 0.0 || y >= diameter {
                    return 0.0;
                }
                2.0 * (r * r - (r - y) * (r - y)).sqrt()
            }
            XsectShape::RectClosed { width, height } => {
                if y >= height {
                    0.0
                } else {
                    width
                }
            }
            XsectShape::RectOpen { width, .. } => width,
            XsectShape::Trapezoidal {
                bottom_width,
                side_slope,
                ..
            } => bottom_width + 2.0 * side_slope * y,
            XsectShape::Triangular { side_slope, .. } => 2.0 * side_slope * y,
        }
    }

    /// Section factor `A·R^(2/3)` at depth `y`
    pub fn section_factor_of_depth(&self, y: f64) -> f64 {
        let a = self.area_of_depth(y);
        if a <= 0.0 {
            return 0.0;
        }
        a * self.radius_of_depth(y).powf(2.0 / 3.0)
    }

    /// Flow depth that produces wetted area `a` (ft)
    pub fn depth_of_area(&self, a: f64) -> f64 {
        let a_full = self.a_full();
        if a <= 0.0 || a_full <= 0.0 {
            return 0.0;
        }
        if a >= a_full {
            return self.y_full();
        }
        match *self {
            XsectShape::RectClosed { width, .. } | XsectShape::RectOpen { width, .. } => a / width,
            XsectShape::Triangular { side_slope, .. } => (a / side_slope).sqrt(),
            XsectShape::Trapezoidal {
                bottom_width,
                side_slope,
                ..
            } => {
                // quadratic: z·y² + b·y − A = 0
                if side_slope <= 0.0 {
                    a / bottom_width
                } else {
                    let disc = bottom_width * bottom_width + 4.0 * side_slope * a;
                    (-bottom_width + disc.sqrt()) / (2.0 * side_slope)
                }
            }
            _ => self.invert_monotone(a, |xs, y| xs.area_of_depth(y)),
        }
    }

    /// Wetted area at which the section factor equals `s` (sq ft)
    pub fn area_of_section_factor(&self, s: f64) -> f64 {
        let s_full = self.s_full();
        if s <= 0.0 || s_full <= 0.0 {
            return 0.0;
        }
        if s >= s_full {
            return self.a_full();
        }
        let y = self.invert_monotone(s, |xs, y| xs.section_factor_of_depth(y));
        self.area_of_depth(y)
    }

    /// Bisection on depth for a monotone quantity `f(y)` over `[0, y_full]`
    fn invert_monotone(&self, target: f64, f: impl Fn(&Self, f64) -> f64) -> f64 {
        let mut y_low = 0.0;
        let mut y_high = self.y_full();
        let tol = INVERT_TOL * self.y_full().max(1.0);

        for _ in 0..INVERT_MAX_ITER {
            let y_mid = 0.5 * (y_low + y_high);
            if f(self, y_mid) < target {
                y_low = y_mid;
            } else {
                y_high = y_mid;
            }
            if y_high - y_low < tol {
                break;
            }
        }
        0.5 * (y_low + y_high)
    }
}
