use http::Method;
use std::collections::HashMap;

#[derive(Debug, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A path pattern such as `/v1/droplet/{guid}`.
///
/// Leading and trailing slashes are ignored on both the pattern and the
/// request path, so `/v1/droplet/abc/` matches the pattern above.
#[derive(Debug)]
struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    fn parse(pattern: &str) -> Self {
        let segments = split_path(pattern)
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();

        PathPattern { segments }
    }

    fn matches<'a>(&self, request_path: &'a str) -> Option<HashMap<String, &'a str>> {
        let request_segments: Vec<&'a str> = split_path(request_path).collect();
        if request_segments.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, value) in self.segments.iter().zip(request_segments) {
            match segment {
                Segment::Literal(expected) if expected != value => return None,
                Segment::Literal(_) => {}
                Segment::Param(name) => {
                    params.insert(name.clone(), value);
                }
            }
        }
        Some(params)
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.trim()
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
}

#[derive(Debug, PartialEq)]
pub struct RouteMatch<'a, A> {
    pub params: HashMap<String, &'a str>,
    pub action: &'a A,
}

#[derive(Debug)]
pub struct Route<A> {
    method: Option<Method>,
    path: PathPattern,
    action: A,
}

impl<A> Route<A> {
    /// Creates a route matching any method on `path`.
    pub fn new(path: &str, action: A) -> Self {
        Self {
            method: None,
            path: PathPattern::parse(path),
            action,
        }
    }

    /// Restricts the route to a single HTTP method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn matches<'a>(&'a self, method: &Method, path: &'a str) -> Option<RouteMatch<'a, A>> {
        if self.method.as_ref().is_some_and(|m| m != method) {
            return None;
        }

        let params = self.path.matches(path)?;
        Some(RouteMatch {
            params,
            action: &self.action,
        })
    }
}

/// An ordered route table. The first matching route wins.
#[derive(Debug)]
pub struct RouteTable<A> {
    routes: Vec<Route<A>>,
}

impl<A> RouteTable<A> {
    pub fn new(routes: Vec<Route<A>>) -> Self {
        Self { routes }
    }

    pub fn resolve<'a, B>(&'a self, request: &'a http::Request<B>) -> Option<RouteMatch<'a, A>> {
        let path = request.uri().path();

        self.routes
            .iter()
            .find_map(|route| route.matches(request.method(), path))
    }
}
