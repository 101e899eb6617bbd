use gateway_api::apis::standard::httproutes::{
    HTTPRouteRulesMatches, HTTPRouteRulesMatchesHeaders, HTTPRouteRulesMatchesHeadersType,
};

/// Header condition attached to a route match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchRule {
    /// Header must be equal to the value.
    Equal(String, String),
    /// Header must match the regular expression.
    RegularExpression(String, String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatcherList(pub Vec<MatchRule>);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadersMatchersList(pub MatcherList);

impl MatchRule {
    pub fn name(&self) -> &str {
        match self {
            MatchRule::Equal(name, _) | MatchRule::RegularExpression(name, _) => name,
        }
    }
}

impl HeadersMatchersList {
    /// Adds the header conditions to every match, or creates a header-only
    /// match when there is none.
    pub fn apply(&self, matches: &mut Vec<HTTPRouteRulesMatches>) {
        if self.0.0.is_empty() {
            return;
        }
        if matches.is_empty() {
            matches.push(HTTPRouteRulesMatches::default());
        }
        for route_match in matches.iter_mut() {
            let headers = route_match.headers.get_or_insert_with(Vec::new);
            for rule in &self.0.0 {
                headers.retain(|header| !header.name.eq_ignore_ascii_case(rule.name()));
            }
            headers.extend(Vec::<HTTPRouteRulesMatchesHeaders>::from(self.clone()));
        }
    }
}

impl From<HeadersMatchersList> for Vec<HTTPRouteRulesMatchesHeaders> {
    fn from(value: HeadersMatchersList) -> Self {
        value
            .0
            .0
            .into_iter()
            .map(|matcher| match matcher {
                MatchRule::Equal(name, value) => HTTPRouteRulesMatchesHeaders {
                    name,
                    r#type: Some(HTTPRouteRulesMatchesHeadersType::Exact),
                    value,
                },
                MatchRule::RegularExpression(name, value) => HTTPRouteRulesMatchesHeaders {
                    name,
                    r#type: Some(HTTPRouteRulesMatchesHeadersType::RegularExpression),
                    value,
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use gateway_api::apis::standard::httproutes::{
        HTTPRouteRulesMatches, HTTPRouteRulesMatchesHeadersType,
    };
    use rstest::rstest;

    use super::*;
    use crate::converter::prefix_match;

    #[rstest]
    #[case(
        MatchRule::Equal("X-Canary".to_string(), "always".to_string()),
        HTTPRouteRulesMatchesHeadersType::Exact
    )]
    #[case(
        MatchRule::RegularExpression("X-Canary".to_string(), "^v2.*".to_string()),
        HTTPRouteRulesMatchesHeadersType::RegularExpression
    )]
    fn applies_to_existing_matches(
        #[case] rule: MatchRule,
        #[case] expected: HTTPRouteRulesMatchesHeadersType,
    ) {
        let mut matches = vec![HTTPRouteRulesMatches {
            path: Some(prefix_match("/")),
            ..Default::default()
        }];
        HeadersMatchersList(MatcherList(vec![rule])).apply(&mut matches);
        let headers = matches[0].headers.as_ref().unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].name, "X-Canary");
        assert_eq!(headers[0].r#type, Some(expected));
        assert!(matches[0].path.is_some());
    }

    #[test]
    fn creates_match_when_missing() {
        let mut matches = Vec::new();
        HeadersMatchersList(MatcherList(vec![MatchRule::Equal(
            "X-Env".to_string(),
            "prod".to_string(),
        )]))
        .apply(&mut matches);
        assert_eq!(matches.len(), 1);
        assert!(matches[0].path.is_none());
    }
}
