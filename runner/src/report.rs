//! Results of test runs.

use crate::{Error, models::ImageSet};
use std::fmt::{self, Display, Formatter};

/// The outcome of one test case against one image set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScenarioResult {
    pub image_set: ImageSet,
    pub test_case: String,
    /// Why the scenario failed, if it did.
    pub error: Option<String>,
}

impl ScenarioResult {
    pub fn new(image_set: ImageSet, test_case: String, result: Result<(), Error>) -> Self {
        Self {
            image_set,
            test_case,
            error: result.err().map(|error| error.to_string()),
        }
    }

    pub fn passed(&self) -> bool {
        self.error.is_none()
    }
}

impl Display for ScenarioResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}: {}",
            self.image_set,
            self.test_case,
            if self.passed() { "pass" } else { "fail" }
        )
    }
}

/// Accumulates scenario results over a run.
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    results: Vec<ScenarioResult>,
}

impl RunReport {
    pub fn record(&mut self, result: ScenarioResult) {
        self.results.push(result);
    }

    pub fn results(&self) -> &[ScenarioResult] {
        &self.results
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(ScenarioResult::passed)
    }

    /// One `<images>: <passed>/<total> passed` line per image set, in the order image sets were
    /// first recorded.
    pub fn summaries(&self) -> Vec<String> {
        let mut tallies: Vec<(&ImageSet, usize, usize)> = Vec::new();
        for result in &self.results {
            let index = match tallies
                .iter()
                .position(|(image_set, ..)| *image_set == &result.image_set)
            {
                Some(index) => index,
                None => {
                    tallies.push((&result.image_set, 0, 0));
                    tallies.len() - 1
                }
            };
            let (_, passed, total) = &mut tallies[index];
            *total += 1;
            if result.passed() {
                *passed += 1;
            }
        }
        tallies
            .into_iter()
            .map(|(image_set, passed, total)| format!("{image_set}: {passed}/{total} passed"))
            .collect()
    }
}
