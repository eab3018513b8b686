pub struct FormattedSize {
    pub size: usize,
}

impl std::fmt::Display for FormattedSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let ksize = (self.size as f64) / 1024f64;

        if ksize < 1f64 {
            return write!(f, "{}B", self.size);
        }

        let msize = ksize / 1024f64;

        if msize < 1f64 {
            return write!(f, "{:.1}K", ksize);
        }

        let gsize = msize / 1024f64;

        if gsize < 1f64 {
            write!(f, "{:.1}M", msize)
        } else {
            write!(f, "{:.1}G", gsize)
        }
    }
}

pub fn formatted_size(size: usize) -> FormattedSize {
    FormattedSize { size }
}

/// Returns `numerator` as a percentage of `total`, or 0 when `total` is zero.
#[inline]
pub fn percent_of(numerator: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (numerator as f64 / total as f64) * 100.0
    }
}

/// `ceil(value * percent / 100)` in integer arithmetic.
#[inline]
pub fn ceil_percent(value: usize, percent: usize) -> usize {
    let result = value * percent / 100;
    if 100 * result < value * percent {
        result + 1
    } else {
        result
    }
}
