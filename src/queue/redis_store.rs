use super::{QueueError, RemoteStore, StoreCommand};

/// Redis-backed [`RemoteStore`]. Each batch runs as one `MULTI/EXEC`
/// pipeline on a fresh connection.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn open(url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url).map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(Self { client })
    }
}

impl RemoteStore for RedisStore {
    fn atomic(&self, commands: Vec<StoreCommand>) -> Result<(), QueueError> {
        let mut connection = self
            .client
            .get_connection()
            .map_err(|e| QueueError::Backend(e.to_string()))?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in commands {
            match command {
                StoreCommand::RPush { key, value } => {
                    pipe.rpush(key, value).ignore();
                }
                StoreCommand::SAdd { key, member } => {
                    pipe.sadd(key, member).ignore();
                }
            }
        }

        pipe.query::<()>(&mut connection)
            .map_err(|e| QueueError::Backend(e.to_string()))
    }
}
