//! Test scenarios: which images play which role, and what each test case measures.

use dap_interop_core::{task::QueryType, vdaf::MeasurementScheme};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// The four roles of an interop test deployment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Leader,
    Helper,
    Collector,
}

impl Role {
    /// All roles, in the order their instances are started.
    pub const ALL: [Role; 4] = [Role::Client, Role::Leader, Role::Helper, Role::Collector];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Leader => "leader",
            Role::Helper => "helper",
            Role::Collector => "collector",
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One image reference per role.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSet {
    pub client: String,
    pub leader: String,
    pub helper: String,
    pub collector: String,
}

impl ImageSet {
    pub fn image(&self, role: Role) -> &str {
        match role {
            Role::Client => &self.client,
            Role::Leader => &self.leader,
            Role::Helper => &self.helper,
            Role::Collector => &self.collector,
        }
    }
}

impl Display for ImageSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}",
            self.client, self.leader, self.helper, self.collector
        )
    }
}

/// Candidate images for each role. Tests run against every combination.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLists {
    #[serde(default)]
    pub client: Vec<String>,
    #[serde(default)]
    pub leader: Vec<String>,
    #[serde(default)]
    pub helper: Vec<String>,
    #[serde(default)]
    pub collector: Vec<String>,
}

impl ImageLists {
    fn list(&self, role: Role) -> &[String] {
        match role {
            Role::Client => &self.client,
            Role::Leader => &self.leader,
            Role::Helper => &self.helper,
            Role::Collector => &self.collector,
        }
    }

    /// Returns the roles for which no image is listed.
    pub fn missing_roles(&self) -> Vec<Role> {
        Role::ALL
            .into_iter()
            .filter(|role| self.list(*role).is_empty())
            .collect()
    }

    /// Every distinct image across all roles, in first-listed order.
    pub fn distinct_images(&self) -> Vec<&str> {
        let mut images: Vec<&str> = Vec::new();
        for role in Role::ALL {
            for image in self.list(role) {
                if !images.contains(&image.as_str()) {
                    images.push(image);
                }
            }
        }
        images
    }

    /// The cartesian product of the four lists, with the client varying slowest.
    pub fn image_sets(&self) -> Vec<ImageSet> {
        let mut image_sets = Vec::new();
        for client in &self.client {
            for leader in &self.leader {
                for helper in &self.helper {
                    for collector in &self.collector {
                        image_sets.push(ImageSet {
                            client: client.clone(),
                            leader: leader.clone(),
                            helper: helper.clone(),
                            collector: collector.clone(),
                        });
                    }
                }
            }
        }
        image_sets
    }
}

impl From<ImageSet> for ImageLists {
    fn from(image_set: ImageSet) -> Self {
        Self {
            client: Vec::from([image_set.client]),
            leader: Vec::from([image_set.leader]),
            helper: Vec::from([image_set.helper]),
            collector: Vec::from([image_set.collector]),
        }
    }
}

/// A named combination of aggregation scheme, batch size and query type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TestCase {
    pub name: String,
    pub scheme: MeasurementScheme,
    pub measurement_count: usize,
    pub query_type: QueryType,
}
