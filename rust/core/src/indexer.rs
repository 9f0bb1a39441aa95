//! Client for the commitment-tree indexer.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::commitment::{poseidon_pair, FieldHash};
use crate::error::ClientError;
use crate::utils::parse_felt;
use crate::utils::Address;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerklePath {
    /// Zero while the commitment is not in the tree.
    pub root: FieldHash,
    pub path: Vec<FieldHash>,
    /// Per level, `true` when the running node is the right child.
    pub indices: Vec<bool>,
    pub index: u64,
    /// Amount the indexer observed in the leaf event. Zero for private ops.
    pub amount: u128,
    /// Commitment the indexer resolved the request to.
    pub commitment: FieldHash,
}

impl MerklePath {
    pub fn is_indexed(&self) -> bool {
        !self.root.is_zero()
    }

    /// Root obtained by hashing `leaf` up through the siblings.
    pub fn computed_root(&self, leaf: &FieldHash) -> Result<FieldHash, ClientError> {
        if self.path.len() != self.indices.len() {
            return Err(ClientError::Indexer(format!(
                "path has {} siblings but {} indices",
                self.path.len(),
                self.indices.len()
            )));
        }
        let mut node = *leaf;
        for (sibling, is_right) in self.path.iter().zip(&self.indices) {
            node = if *is_right {
                poseidon_pair(sibling, &node)?
            } else {
                poseidon_pair(&node, sibling)?
            };
        }
        Ok(node)
    }

    pub fn path_bytes(&self) -> Vec<[u8; 32]> {
        self.path.iter().map(|node| *node.as_bytes()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMeta {
    pub address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub logo: String,
}

impl TokenMeta {
    pub fn address(&self) -> Result<Address, ClientError> {
        parse_felt(&self.address)
    }
}

#[async_trait]
pub trait Indexer: Send + Sync {
    async fn get_path(
        &self,
        commitment: &FieldHash,
        note_hash: &FieldHash,
    ) -> Result<MerklePath, ClientError>;

    async fn tokens(&self) -> Result<Vec<TokenMeta>, ClientError>;
}

#[derive(Debug, Serialize)]
struct PathRequest {
    commitment: String,
    note_hash: String,
}

#[derive(Debug, Deserialize)]
struct PathResponse {
    root: String,
    path: Vec<String>,
    indices: Vec<u8>,
    index: u64,
    amount: String,
    commitment: String,
}

#[derive(Debug, Deserialize)]
struct TokensResponse {
    tokens: Vec<TokenMeta>,
}

impl TryFrom<PathResponse> for MerklePath {
    type Error = ClientError;

    fn try_from(body: PathResponse) -> Result<Self, Self::Error> {
        let invalid = |field: &str, err: ClientError| ClientError::Indexer(format!("{field}: {err}"));
        let root: FieldHash = body.root.parse().map_err(|e| invalid("root", e))?;
        let path = body
            .path
            .iter()
            .map(|node| node.parse::<FieldHash>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid("path", e))?;
        let indices = body
            .indices
            .iter()
            .map(|bit| match bit {
                0 => Ok(false),
                1 => Ok(true),
                other => Err(ClientError::Indexer(format!("path index bit {other}"))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let amount = body
            .amount
            .parse::<FieldHash>()
            .map_err(|e| invalid("amount", e))?
            .to_u128()
            .ok_or_else(|| ClientError::Indexer("amount exceeds u128".to_string()))?;
        let commitment: FieldHash = body.commitment.parse().map_err(|e| invalid("commitment", e))?;
        Ok(MerklePath {
            root,
            path,
            indices,
            index: body.index,
            amount,
            commitment,
        })
    }
}

pub struct HttpIndexer {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpIndexer {
    pub fn new(base_url: Url, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::Indexer(err.to_string()))?;
        Ok(Self { base_url, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }
}

#[async_trait]
impl Indexer for HttpIndexer {
    async fn get_path(
        &self,
        commitment: &FieldHash,
        note_hash: &FieldHash,
    ) -> Result<MerklePath, ClientError> {
        let request = PathRequest {
            commitment: commitment.to_hex(),
            note_hash: note_hash.to_hex(),
        };
        let response = self
            .client
            .post(self.endpoint("get_path"))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ClientError::Indexer(format!(
                "get_path error: {}",
                response.status()
            )));
        }
        let body: PathResponse = response.json().await?;
        let path = MerklePath::try_from(body)?;
        debug!(%note_hash, indexed = path.is_indexed(), index = path.index, "merkle path fetched");
        Ok(path)
    }

    async fn tokens(&self) -> Result<Vec<TokenMeta>, ClientError> {
        let response = self.client.get(self.endpoint("tokens")).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Indexer(format!(
                "tokens error: {}",
                response.status()
            )));
        }
        let body: TokensResponse = response.json().await?;
        Ok(body.tokens)
    }
}
