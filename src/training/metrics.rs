//! Held-out evaluation: per-class report and confusion matrix.

use crate::category::{Category, NUM_CATEGORIES};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Precision, recall and F1 of one class (or an average over classes).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassScores {
    /// TP / (TP + FP), 0 when nothing was predicted
    pub precision: f64,
    /// TP / (TP + FN), 0 when the class has no samples
    pub recall: f64,
    /// Harmonic mean of precision and recall, 0 when both are 0
    pub f1: f64,
    /// Number of true samples
    pub support: usize,
}

/// One row of the report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassRow {
    /// Category label
    pub label: String,
    /// Scores for the category
    #[serde(flatten)]
    pub scores: ClassScores,
}

/// Per-class metrics plus accuracy and averages.
///
/// Rows cover every class that occurs in either the true or the predicted
/// labels, in class order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationReport {
    /// One row per class seen
    pub classes: Vec<ClassRow>,
    /// Fraction of correct predictions
    pub accuracy: f64,
    /// Unweighted mean over rows
    pub macro_avg: ClassScores,
    /// Support-weighted mean over rows
    pub weighted_avg: ClassScores,
}

impl ClassificationReport {
    /// Compute the report for parallel label slices.
    pub fn new(y_true: &[usize], y_pred: &[usize]) -> Self {
        let matrix = ConfusionMatrix::new(y_true, y_pred);
        let seen: BTreeSet<usize> = y_true.iter().chain(y_pred.iter()).copied().collect();

        let classes: Vec<ClassRow> = seen
            .iter()
            .map(|&c| {
                let tp = matrix.get(c, c) as f64;
                let predicted = matrix.predicted_count(c) as f64;
                let support = matrix.true_count(c);
                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support as f64);
                ClassRow {
                    label: class_label(c),
                    scores: ClassScores {
                        precision,
                        recall,
                        f1: ratio(2.0 * precision * recall, precision + recall),
                        support,
                    },
                }
            })
            .collect();

        let total = y_true.len();
        let correct = (0..matrix.n_classes()).map(|c| matrix.get(c, c)).sum::<usize>();
        let n_rows = classes.len() as f64;
        let sum = |f: fn(&ClassScores) -> f64| classes.iter().map(|r| f(&r.scores)).sum::<f64>();
        let weighted = |f: fn(&ClassScores) -> f64| {
            classes.iter().map(|r| f(&r.scores) * r.scores.support as f64).sum::<f64>()
        };

        let macro_avg = ClassScores {
            precision: ratio(sum(|s| s.precision), n_rows),
            recall: ratio(sum(|s| s.recall), n_rows),
            f1: ratio(sum(|s| s.f1), n_rows),
            support: total,
        };
        let weighted_avg = ClassScores {
            precision: ratio(weighted(|s| s.precision), total as f64),
            recall: ratio(weighted(|s| s.recall), total as f64),
            f1: ratio(weighted(|s| s.f1), total as f64),
            support: total,
        };

        Self {
            classes,
            accuracy: ratio(correct as f64, total as f64),
            macro_avg,
            weighted_avg,
        }
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .classes
            .iter()
            .map(|r| r.label.len())
            .chain(std::iter::once("weighted avg".len()))
            .max()
            .unwrap_or(12);

        writeln!(f, "{:>width$} {:>9} {:>9} {:>9} {:>9}", "", "precision", "recall", "f1-score", "support")?;
        writeln!(f)?;
        for row in &self.classes {
            write_scores(f, &row.label, &row.scores, width)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>width$} {:>9} {:>9} {:>9.3} {:>9}",
            "accuracy", "", "", self.accuracy, self.macro_avg.support
        )?;
        write_scores(f, "macro avg", &self.macro_avg, width)?;
        write_scores(f, "weighted avg", &self.weighted_avg, width)
    }
}

fn write_scores(f: &mut fmt::Formatter<'_>, label: &str, s: &ClassScores, width: usize) -> fmt::Result {
    writeln!(
        f,
        "{:>width$} {:>9.3} {:>9.3} {:>9.3} {:>9}",
        label, s.precision, s.recall, s.f1, s.support
    )
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

fn class_label(index: usize) -> String {
    Category::from_index(index)
        .map(|c| c.label().to_string())
        .unwrap_or_else(|| format!("class {}", index))
}

/// Counts of (true, predicted) label pairs over the twelve categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfusionMatrix {
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    /// Tally parallel label slices. Labels outside the category range are
    /// ignored.
    pub fn new(y_true: &[usize], y_pred: &[usize]) -> Self {
        let mut counts = vec![vec![0; NUM_CATEGORIES]; NUM_CATEGORIES];
        for (&t, &p) in y_true.iter().zip(y_pred) {
            if t < NUM_CATEGORIES && p < NUM_CATEGORIES {
                counts[t][p] += 1;
            }
        }
        Self { counts }
    }

    /// Number of classes (rows and columns).
    pub fn n_classes(&self) -> usize {
        self.counts.len()
    }

    /// Samples of class `truth` predicted as `predicted`.
    pub fn get(&self, truth: usize, predicted: usize) -> usize {
        self.counts[truth][predicted]
    }

    /// Row sum.
    pub fn true_count(&self, class: usize) -> usize {
        self.counts[class].iter().sum()
    }

    /// Column sum.
    pub fn predicted_count(&self, class: usize) -> usize {
        self.counts.iter().map(|row| row[class]).sum()
    }

    /// The raw rows.
    pub fn rows(&self) -> &[Vec<usize>] {
        &self.counts
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.counts {
            let cells: Vec<String> = row.iter().map(|c| format!("{:>4}", c)).collect();
            writeln!(f, "[{}]", cells.join(""))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_matches_hand_computation() {
        // class 0: 2 true, both right; class 1: 2 true, one predicted as 0
        let y_true = [0, 0, 1, 1];
        let y_pred = [0, 0, 1, 0];
        let report = ClassificationReport::new(&y_true, &y_pred);

        assert_eq!(report.classes.len(), 2);
        let c0 = report.classes[0].scores;
        assert!((c0.precision - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(c0.recall, 1.0);
        assert!((c0.f1 - 0.8).abs() < 1e-12);
        let c1 = report.classes[1].scores;
        assert_eq!(c1.precision, 1.0);
        assert_eq!(c1.recall, 0.5);
        assert_eq!(report.accuracy, 0.75);
        assert_eq!(report.macro_avg.support, 4);
    }

    #[test]
    fn test_predicted_only_class_has_zero_scores() {
        let report = ClassificationReport::new(&[0, 0], &[0, 3]);
        assert_eq!(report.classes.len(), 2);
        let row = &report.classes[1];
        assert_eq!(row.label, Category::from_index(3).unwrap().label());
        assert_eq!(row.scores.support, 0);
        assert_eq!(row.scores.precision, 0.0);
        assert_eq!(row.scores.f1, 0.0);
    }

    #[test]
    fn test_display_uses_three_digits() {
        let text = ClassificationReport::new(&[0, 1, 1], &[0, 1, 0]).to_string();
        assert!(text.contains("precision"));
        assert!(text.contains("0.667"));
        assert!(text.contains("weighted avg"));
    }

    #[test]
    fn test_confusion_matrix_sums() {
        let cm = ConfusionMatrix::new(&[0, 1, 1, 2], &[0, 1, 2, 2]);
        assert_eq!(cm.get(1, 2), 1);
        assert_eq!(cm.true_count(1), 2);
        assert_eq!(cm.predicted_count(2), 2);
        assert_eq!(cm.rows().len(), NUM_CATEGORIES);
    }
}
