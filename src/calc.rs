use serde::Serialize;

/// Valid score values for a single recorded assessment.
pub const MIN_SCORE: i64 = 2;
pub const MAX_SCORE: i64 = 5;

pub fn is_valid_score(score: i64) -> bool {
    (MIN_SCORE..=MAX_SCORE).contains(&score)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSummary {
    pub average: f64,
    pub count: usize,
    /// `None` until at least one score exists; a final grade cannot be
    /// assigned from an empty history.
    pub final_grade: Option<i64>,
}

/// Fold a score history into its arithmetic mean and discretized final grade.
///
/// Order-insensitive and pure: the result depends only on the multiset of
/// scores. An empty history yields average 0.0 with `count = 0`, which is how
/// callers tell "no data" apart from a real zero.
pub fn aggregate<I>(scores: I) -> GradeSummary
where
    I: IntoIterator<Item = i64>,
{
    let mut sum: i64 = 0;
    let mut count: usize = 0;
    for s in scores {
        sum += s;
        count += 1;
    }

    if count == 0 {
        return GradeSummary {
            average: 0.0,
            count: 0,
            final_grade: None,
        };
    }

    // Integer sum, single division: exact up to display precision for any
    // realistic history length.
    let average = (sum as f64) / (count as f64);
    GradeSummary {
        average,
        count,
        final_grade: Some(final_grade(average)),
    }
}

/// The one thresholding rule for deriving a final grade from an average.
/// Closed thresholds, evaluated top-down, first match wins.
pub fn final_grade(average: f64) -> i64 {
    if average >= 4.5 {
        5
    } else if average >= 3.5 {
        4
    } else if average >= 2.5 {
        3
    } else {
        2
    }
}

/// Two-decimal rendering of an average, a presentation concern only.
pub fn format_average(average: f64) -> String {
    format!("{:.2}", average)
}
