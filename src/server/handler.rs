//! Request dispatch against the key store

use super::store::KeyStore;
use crate::protocol::{Request, Response, Status};

/// Execute one data request. `Hello` is only valid as the first frame of a
/// connection and is answered by the connection handler, not here.
pub fn dispatch(store: &KeyStore, request: Request) -> Response {
    match request {
        Request::Hello { .. } => Response::status(Status::InvalidCommand),
        Request::Get { key } => match store.get(&key) {
            Ok(value) => Response::value(value),
            Err(status) => Response::status(status),
        },
        Request::Set { key, value, ttl } => Response::status(store.set(&key, value, ttl)),
        Request::Delete { key } => Response::status(store.delete(&key)),
        Request::Test { key } => Response::status(store.test(&key)),
        Request::Expire { key, seconds } => Response::status(store.expire(&key, seconds)),
        Request::Keys { pattern } => Response::keys(store.keys(&pattern)),
        Request::NrKeys { pattern } => Response::count(store.nrkeys(&pattern)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::StoreLimits;
    use crate::protocol::ResponseBody;

    #[test]
    fn test_dispatch() {
        let store = KeyStore::new(StoreLimits::default());

        let response = dispatch(&store, Request::Get { key: "123".into() });
        assert_eq!(response.status, Status::NoSuchKey);

        dispatch(
            &store,
            Request::Set {
                key: "123".into(),
                value: b"456".to_vec(),
                ttl: None,
            },
        );
        let response = dispatch(&store, Request::Get { key: "123".into() });
        assert_eq!(response.body, ResponseBody::Value(b"456".to_vec()));

        let response = dispatch(
            &store,
            Request::NrKeys {
                pattern: "*".into(),
            },
        );
        assert_eq!(response.body, ResponseBody::Count(1));
    }

    #[test]
    fn test_hello_outside_handshake() {
        let store = KeyStore::new(StoreLimits::default());
        let response = dispatch(
            &store,
            Request::Hello {
                version: 1,
                session_id: "s".into(),
            },
        );
        assert_eq!(response.status, Status::InvalidCommand);
    }
}
