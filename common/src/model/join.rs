use serde::{Deserialize, Serialize};

/// How the uploaded table is joined onto the target explore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    #[default]
    LeftOuter,
    RightOuter,
    FullOuter,
    Cross,
}

impl JoinType {
    /// The LookML keyword for this join type.
    pub fn as_lookml(&self) -> &'static str {
        match self {
            JoinType::Inner => "inner",
            JoinType::LeftOuter => "left_outer",
            JoinType::RightOuter => "right_outer",
            JoinType::FullOuter => "full_outer",
            JoinType::Cross => "cross",
        }
    }

    /// Relationship cardinality implied by the join type, seen from the explore
    /// towards the uploaded table.
    pub fn relationship(&self) -> &'static str {
        match self {
            JoinType::Inner | JoinType::LeftOuter => "many_to_one",
            JoinType::RightOuter => "one_to_many",
            JoinType::FullOuter | JoinType::Cross => "many_to_many",
        }
    }
}

/// One key pair linking a column of the uploaded table to a field of the explore.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoinPair {
    #[serde(default)]
    pub uuid: String,
    /// Column of the newly uploaded table.
    pub from_field: String,
    /// Field of the target explore, `view.field` or a bare field name.
    pub to_field: String,
    #[serde(default)]
    pub from_query_id: String,
    #[serde(default)]
    pub to_query_id: String,
}

impl JoinPair {
    pub fn is_complete(&self) -> bool {
        !self.from_field.trim().is_empty() && !self.to_field.trim().is_empty()
    }
}

/// The `joins` document sent alongside an uploaded CSV.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JoinConfig {
    #[serde(rename = "type", default)]
    pub join_type: JoinType,
    #[serde(default)]
    pub joins: Vec<JoinPair>,
    /// Target explore as `model::explore`.
    #[serde(default)]
    pub explore_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinConfigError {
    #[error("join {index} must name both a from_field and a to_field")]
    IncompletePair { index: usize },
    #[error("an explore_id is required when joins are given")]
    MissingExplore,
}

impl JoinConfig {
    /// Checks that every pair names both fields and that pairs come with a target explore.
    ///
    /// An empty pair list is accepted for any join type; it simply produces no join clause.
    pub fn validate(&self) -> Result<(), JoinConfigError> {
        if let Some(index) = self.joins.iter().position(|pair| !pair.is_complete()) {
            return Err(JoinConfigError::IncompletePair { index });
        }
        if !self.joins.is_empty() && self.explore_name().is_none() {
            return Err(JoinConfigError::MissingExplore);
        }
        Ok(())
    }

    /// Pairs that can be rendered into a join clause.
    pub fn complete_pairs(&self) -> impl Iterator<Item = &JoinPair> {
        self.joins.iter().filter(|pair| pair.is_complete())
    }

    pub fn has_complete_pairs(&self) -> bool {
        self.complete_pairs().next().is_some()
    }

    /// Explore part of `explore_id`; a value without `::` is taken as the explore itself.
    pub fn explore_name(&self) -> Option<&str> {
        let id = self.explore_id.trim();
        let name = match id.split_once("::") {
            Some((_, explore)) => explore.trim(),
            None => id,
        };
        (!name.is_empty()).then_some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(from: &str, to: &str) -> JoinPair {
        JoinPair {
            from_field: from.to_string(),
            to_field: to.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn parses_the_portal_payload() {
        let raw = r#"{
            "type": "full_outer",
            "explore_id": "thelook::order_items",
            "joins": [{
                "uuid": "a1",
                "from_field": "user_id",
                "to_field": "users.id",
                "from_query_id": "q1",
                "to_query_id": "q2"
            }]
        }"#;
        let config: JoinConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.join_type, JoinType::FullOuter);
        assert_eq!(config.explore_name(), Some("order_items"));
        assert_eq!(config.joins[0].to_field, "users.id");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_members_fall_back_to_defaults() {
        let config: JoinConfig = serde_json::from_str(r#"{"joins": []}"#).unwrap();
        assert_eq!(config.join_type, JoinType::LeftOuter);
        assert!(config.validate().is_ok());
        assert!(!config.has_complete_pairs());
    }

    #[test]
    fn unknown_join_type_is_rejected() {
        let parsed = serde_json::from_str::<JoinConfig>(r#"{"type": "sideways", "joins": []}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn incomplete_pair_fails_validation() {
        let config = JoinConfig {
            join_type: JoinType::Inner,
            joins: vec![pair("user_id", "users.id"), pair("", "users.email")],
            explore_id: "thelook::users".to_string(),
        };
        assert_eq!(
            config.validate(),
            Err(JoinConfigError::IncompletePair { index: 1 })
        );
    }

    #[test]
    fn joins_require_an_explore() {
        let config = JoinConfig {
            joins: vec![pair("user_id", "users.id")],
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(JoinConfigError::MissingExplore));
    }

    #[test]
    fn empty_join_list_is_valid_for_every_type() {
        for join_type in [JoinType::Inner, JoinType::RightOuter, JoinType::Cross] {
            let config = JoinConfig {
                join_type,
                ..Default::default()
            };
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn relationship_follows_join_type() {
        assert_eq!(JoinType::LeftOuter.relationship(), "many_to_one");
        assert_eq!(JoinType::RightOuter.relationship(), "one_to_many");
        assert_eq!(JoinType::Cross.relationship(), "many_to_many");
    }
}
