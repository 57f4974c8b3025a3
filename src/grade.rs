/// Lower-bound-inclusive thresholds, highest first.
const GRADE_THRESHOLDS: [(f64, &str); 5] = [
    (95.0, "A+"),
    (85.0, "A"),
    (75.0, "B+"),
    (65.0, "B"),
    (55.0, "C"),
];

const FAILING_GRADE: &str = "F";

pub fn grade(percentage: f64) -> &'static str {
    GRADE_THRESHOLDS
        .iter()
        .find(|(floor, _)| percentage >= *floor)
        .map_or(FAILING_GRADE, |&(_, letter)| letter)
}

/// Returns `None` when the result carries no usable total.
pub fn percentage(marks_obtained: i32, total_marks: i32) -> Option<f64> {
    if total_marks <= 0 || marks_obtained < 0 {
        return None;
    }
    Some(f64::from(marks_obtained) / f64::from(total_marks) * 100.0)
}

pub fn format_percentage(percentage: f64) -> String {
    format!("{percentage:.2}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(100.0, "A+")]
    #[case(95.0, "A+")]
    #[case(94.99, "A")]
    #[case(85.0, "A")]
    #[case(84.99, "B+")]
    #[case(75.0, "B+")]
    #[case(65.0, "B")]
    #[case(55.0, "C")]
    #[case(54.99, "F")]
    #[case(0.0, "F")]
    fn grades_follow_inclusive_lower_bounds(#[case] percentage: f64, #[case] expected: &str) {
        assert_eq!(grade(percentage), expected);
    }

    #[test]
    fn percentage_uses_total_marks() {
        let value = percentage(88, 100).unwrap();
        assert!((value - 88.0).abs() < f64::EPSILON);
        assert_eq!(format_percentage(value), "88.00");

        let third = percentage(1, 3).unwrap();
        assert_eq!(format_percentage(third), "33.33");
    }

    #[test]
    fn percentage_rejects_empty_totals() {
        assert_eq!(percentage(10, 0), None);
        assert_eq!(percentage(-1, 10), None);
    }
}
