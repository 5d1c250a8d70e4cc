//! Calls to the enrollment endpoint of the control plane.

use std::time::Duration;

use ureq::{Agent, AgentBuilder};
use url::{Url, form_urlencoded::byte_serialize};

use crate::target::EnrollmentTarget;

/// The timeout for a single request to the enrollment service.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The user agent sent with every request.
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// An error that may occur when enrolling a host.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The enrollment request failed.
    #[error("Enrolling host {hostname} using {url} failed:\n{source}")]
    Enrollment {
        /// The host that should have been enrolled.
        hostname: String,
        /// The URL of the enrollment request.
        url: Url,
        /// The source error.
        source: Box<ureq::Error>,
    },
}

/// Creates a new [`Agent`] for requests to the enrollment service.
///
/// The agent applies [`REQUEST_TIMEOUT`] to every request.
pub fn new_agent() -> Agent {
    AgentBuilder::new()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
}

/// Percent-encodes a single query value.
fn encode(value: &str) -> String {
    byte_serialize(value.as_bytes()).collect()
}

/// A client for the enrollment endpoint.
#[derive(Debug)]
pub struct EnrollmentClient {
    agent: Agent,
    enroll_url: Url,
    os_type: String,
    user: String,
}

impl EnrollmentClient {
    /// Creates a new [`EnrollmentClient`].
    ///
    /// Hosts are added to the inventory group of their operating system `os_type` and the control
    /// plane connects to them as system user `user`.
    pub fn new(agent: Agent, enroll_url: Url, os_type: String, user: String) -> Self {
        Self {
            agent,
            enroll_url,
            os_type,
            user,
        }
    }

    /// Returns the URL used for enrolling `target`.
    ///
    /// The query consists of the `hostname`, `environment`, `applications`, `os_type` and `user`
    /// parameters in this order.
    /// Applications are joined by literal commas, all values are percent-encoded otherwise.
    /// Parameters are appended to a query that may already be present in the enrollment URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use enroll_agent::{
    ///     client::{EnrollmentClient, new_agent},
    ///     target::{EnrollmentTarget, Selection},
    /// };
    ///
    /// # fn main() -> testresult::TestResult {
    /// let client = EnrollmentClient::new(
    ///     new_agent(),
    ///     "https://enroll.example.org/do_enroll".parse()?,
    ///     "arch".to_string(),
    ///     "root".to_string(),
    /// );
    /// let target = EnrollmentTarget::new(
    ///     "node1".to_string(),
    ///     Selection::new("staging".to_string(), vec!["web".to_string(), "cache".to_string()]),
    /// );
    /// assert_eq!(
    ///     client.enrollment_url(&target).as_str(),
    ///     "https://enroll.example.org/do_enroll?hostname=node1&environment=staging&applications=web,cache&os_type=arch&user=root"
    /// );
    /// # Ok(())
    /// # }
    /// ```
    pub fn enrollment_url(&self, target: &EnrollmentTarget) -> Url {
        let applications = target
            .get_applications()
            .iter()
            .map(|application| encode(application))
            .collect::<Vec<String>>()
            .join(",");
        let query = format!(
            "hostname={}&environment={}&applications={applications}&os_type={}&user={}",
            encode(target.get_hostname()),
            encode(target.get_environment()),
            encode(&self.os_type),
            encode(&self.user),
        );

        let mut url = self.enroll_url.clone();
        match self.enroll_url.query() {
            Some(existing) if !existing.is_empty() => {
                url.set_query(Some(&format!("{existing}&{query}")))
            }
            _ => url.set_query(Some(&query)),
        }
        url
    }

    /// Enrolls `target` with the control plane.
    ///
    /// Any successful response counts as enrollment.
    /// The body of the response is returned for informational purposes only.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the enrollment service responds with an error
    /// status.
    pub fn enroll(&self, target: &EnrollmentTarget) -> Result<String, Error> {
        let url = self.enrollment_url(target);
        log::debug!("Enrolling {target} using {url}");

        let response = self
            .agent
            .request_url("GET", &url)
            .call()
            .map_err(|source| Error::Enrollment {
                hostname: target.get_hostname().to_string(),
                url: url.clone(),
                source: Box::new(source),
            })?;

        // the body is a human readable message and may be unreadable without affecting enrollment
        let message = response.into_string().unwrap_or_else(|error| {
            log::debug!("Unable to read enrollment response: {error}");
            String::new()
        });
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use rstest::rstest;
    use testresult::TestResult;

    use super::*;
    use crate::target::Selection;

    fn target(environment: &str, applications: &[&str]) -> EnrollmentTarget {
        EnrollmentTarget::new(
            "node1.example.org".to_string(),
            Selection::new(
                environment.to_string(),
                applications.iter().map(ToString::to_string).collect(),
            ),
        )
    }

    #[rstest]
    #[case::empty_target(
        "https://enroll.example.org/do_enroll",
        target("", &[]),
        "",
        "https://enroll.example.org/do_enroll?hostname=node1.example.org&environment=&applications=&os_type=&user=root"
    )]
    #[case::existing_query(
        "https://enroll.example.org/do_enroll?token=abc",
        target("prod", &["web"]),
        "debian",
        "https://enroll.example.org/do_enroll?token=abc&hostname=node1.example.org&environment=prod&applications=web&os_type=debian&user=root"
    )]
    #[case::encoded_values(
        "https://enroll.example.org/do_enroll",
        target("qa&dev", &["web app", "db"]),
        "arch",
        "https://enroll.example.org/do_enroll?hostname=node1.example.org&environment=qa%26dev&applications=web+app,db&os_type=arch&user=root"
    )]
    fn enrollment_url_has_ordered_query(
        #[case] enroll_url: &str,
        #[case] target: EnrollmentTarget,
        #[case] os_type: &str,
        #[case] expected: &str,
    ) -> TestResult {
        let client = EnrollmentClient::new(
            new_agent(),
            enroll_url.parse()?,
            os_type.to_string(),
            "root".to_string(),
        );
        assert_eq!(client.enrollment_url(&target).as_str(), expected);
        Ok(())
    }

    #[rstest]
    fn enroll_returns_message() -> TestResult {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/do_enroll")
                .query_param("hostname", "node1.example.org")
                .query_param("environment", "staging")
                .query_param("applications", "web,cache")
                .query_param("os_type", "rocky")
                .query_param("user", "ansible");
            then.status(200).body("enrolled");
        });

        let client = EnrollmentClient::new(
            new_agent(),
            server.url("/do_enroll").parse()?,
            "rocky".to_string(),
            "ansible".to_string(),
        );
        let message = client.enroll(&target("staging", &["web", "cache"]))?;

        mock.assert();
        assert_eq!(message, "enrolled");
        Ok(())
    }

    #[rstest]
    fn enroll_fails_on_error_status() -> TestResult {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/do_enroll");
            then.status(403).body("unknown host");
        });

        let client = EnrollmentClient::new(
            new_agent(),
            server.url("/do_enroll").parse()?,
            "arch".to_string(),
            "root".to_string(),
        );

        assert!(matches!(
            client.enroll(&target("prod", &[])),
            Err(Error::Enrollment { hostname, .. }) if hostname == "node1.example.org"
        ));
        mock.assert();
        Ok(())
    }
}
