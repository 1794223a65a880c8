use proptest::prelude::*;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use warden_core::fingerprint;
use warden_core::input::{
    Action, AuthorizationInput, Environment, Principal, RequestContext, Resource, ResourceKind,
    Role, Sensitivity,
};

fn input_with(
    params: &[(String, String)],
    attrs: &[(String, String)],
    teams: &BTreeSet<String>,
) -> AuthorizationInput {
    AuthorizationInput {
        principal: Principal {
            id: "u-1".into(),
            display_name: "Prop".into(),
            role: Role::Developer,
            teams: teams.clone(),
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.clone(), json!(v)))
                .collect::<BTreeMap<_, _>>(),
            mfa_verified: false,
        },
        action: Action::ToolInvoke,
        resource: Resource {
            kind: ResourceKind::Tool,
            id: "t-1".into(),
            name: "list_issues".into(),
            description: None,
            sensitivity: Sensitivity::Low,
            tags: BTreeSet::new(),
            owner: None,
            team_owners: BTreeSet::new(),
            environment: Environment::Dev,
        },
        parameters: params.iter().map(|(k, v)| (k.clone(), json!(v))).collect(),
        context: RequestContext {
            timestamp: chrono::Utc::now(),
            client_ip: None,
            session_id: None,
            request_id: "r-prop".into(),
            geo_country: None,
        },
        policy_version: "v1".into(),
    }
}

proptest! {
    /// Insertion order of parameters, attributes, and teams never changes
    /// the fingerprint: the same logical input hashes identically.
    #[test]
    fn insertion_order_is_irrelevant(
        mut pairs in prop::collection::vec(("[a-z]{1,8}", "[a-z0-9]{0,12}"), 0..8),
        mut attrs in prop::collection::vec(("[a-z]{1,8}", "[a-z0-9]{0,12}"), 0..6),
        teams in prop::collection::btree_set("team-[a-z]{1,4}", 0..5),
    ) {
        // Duplicate keys would make reversal pick a different winner.
        let mut seen = std::collections::HashSet::new();
        pairs.retain(|(k, _)| seen.insert(k.clone()));
        seen.clear();
        attrs.retain(|(k, _)| seen.insert(k.clone()));

        let forward = fingerprint::of_input(&input_with(&pairs, &attrs, &teams));
        pairs.reverse();
        attrs.reverse();
        let reversed = fingerprint::of_input(&input_with(&pairs, &attrs, &teams));
        prop_assert_eq!(forward, reversed);
    }

    /// Changing any included field changes the fingerprint.
    #[test]
    fn included_fields_are_significant(extra in "[a-z]{1,8}", value in "[a-z0-9]{1,12}") {
        let teams = BTreeSet::new();
        let base = input_with(&[], &[], &teams);
        let base_fp = fingerprint::of_input(&base);

        let mut with_param = base.clone();
        with_param.parameters.insert(extra.clone(), json!(value.clone()));
        prop_assert_ne!(base_fp, fingerprint::of_input(&with_param));

        let mut with_attr = base.clone();
        with_attr.principal.attributes.insert(extra.clone(), json!(value));
        prop_assert_ne!(base_fp, fingerprint::of_input(&with_attr));

        let mut with_team = base;
        with_team.principal.teams.insert(format!("team-{extra}"));
        prop_assert_ne!(base_fp, fingerprint::of_input(&with_team));
    }
}
