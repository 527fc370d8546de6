//! 内存向量索引
//!
//! 每个集合在创建时声明维度与度量（余弦），之后不可变；upsert 按 id 覆盖。
//! search 返回相似度最高的 k 条，分数降序、同分按 id 升序，保证输出确定。
//! 可选 JSON 快照用于持久化。

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{HiveError, HiveResult};

/// 记录负载：字符串键到任意 JSON 值
pub type Payload = serde_json::Map<String, Value>;

/// 相似度度量（目前仅余弦）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
}

/// 单条向量记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub payload: Payload,
}

impl Record {
    pub fn new(id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
            payload: Payload::new(),
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// 检索命中
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// 命名集合：维度与度量在创建后固定；BTreeMap 保证按 id 有序遍历
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    pub dimensions: usize,
    pub metric: Metric,
    records: BTreeMap<String, Record>,
}

impl Collection {
    fn new(name: &str, dimensions: usize) -> Self {
        Self {
            name: name.to_string(),
            dimensions,
            metric: Metric::Cosine,
            records: BTreeMap::new(),
        }
    }

    /// 维度一致且各分量有限（NaN / inf 会破坏排序，也无法写入 JSON 快照）
    fn check_vector(&self, vector: &[f32]) -> HiveResult<()> {
        if vector.len() != self.dimensions {
            return Err(HiveError::DimensionMismatch {
                expected: self.dimensions,
                actual: vector.len(),
            });
        }
        if let Some(pos) = vector.iter().position(|x| !x.is_finite()) {
            return Err(HiveError::InvalidInput(format!(
                "vector component {pos} of collection '{}' is not finite",
                self.name
            )));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// 向量索引：集合名 -> 集合
#[derive(Debug, Default)]
pub struct VectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Collection>> {
        self.collections.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Collection>> {
        self.collections.write().unwrap_or_else(|e| e.into_inner())
    }

    /// 创建集合；维度为 0 或同名集合已存在时拒绝
    pub fn create_collection(&self, name: &str, dimensions: usize) -> HiveResult<()> {
        if dimensions == 0 {
            return Err(HiveError::InvalidInput(format!(
                "collection '{name}' must have a non-zero dimensionality"
            )));
        }
        let mut collections = self.write();
        if collections.contains_key(name) {
            return Err(HiveError::CollectionAlreadyExists(name.to_string()));
        }
        collections.insert(name.to_string(), Collection::new(name, dimensions));
        tracing::debug!(collection = name, dimensions, "collection created");
        Ok(())
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// 集合声明的维度
    pub fn dimensions(&self, name: &str) -> HiveResult<usize> {
        self.read()
            .get(name)
            .map(|c| c.dimensions)
            .ok_or_else(|| HiveError::UnknownCollection(name.to_string()))
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// 写入或按 id 覆盖一条记录
    pub fn upsert(&self, collection: &str, record: Record) -> HiveResult<()> {
        let mut collections = self.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| HiveError::UnknownCollection(collection.to_string()))?;
        target.check_vector(&record.vector)?;
        target.records.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn get(&self, collection: &str, id: &str) -> HiveResult<Option<Record>> {
        let collections = self.read();
        let target = collections
            .get(collection)
            .ok_or_else(|| HiveError::UnknownCollection(collection.to_string()))?;
        Ok(target.records.get(id).cloned())
    }

    pub fn len(&self, collection: &str) -> HiveResult<usize> {
        let collections = self.read();
        collections
            .get(collection)
            .map(Collection::len)
            .ok_or_else(|| HiveError::UnknownCollection(collection.to_string()))
    }

    /// 删除 payload 中 `source_id` 等于给定值的所有记录，返回删除条数（重新索引文档时使用）
    pub fn remove_by_source(&self, collection: &str, source_id: &str) -> HiveResult<usize> {
        let mut collections = self.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| HiveError::UnknownCollection(collection.to_string()))?;
        let before = target.records.len();
        target
            .records
            .retain(|_, r| r.payload.get("source_id").and_then(Value::as_str) != Some(source_id));
        Ok(before - target.records.len())
    }

    /// 余弦相似度 top-k：分数降序，同分按 id 升序
    pub fn search(&self, collection: &str, query: &[f32], k: usize) -> HiveResult<Vec<SearchHit>> {
        let collections = self.read();
        let target = collections
            .get(collection)
            .ok_or_else(|| HiveError::UnknownCollection(collection.to_string()))?;
        target.check_vector(query)?;

        let mut scored: Vec<(f32, &Record)> = target
            .records
            .values()
            .map(|r| (cosine_similarity(query, &r.vector), r))
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, r)| SearchHit {
                id: r.id.clone(),
                score,
                payload: r.payload.clone(),
            })
            .collect())
    }

    /// 将全部集合写入 JSON 快照；父目录不存在时自动创建
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> HiveResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut collections: Vec<Collection> = self.read().values().cloned().collect();
        collections.sort_by(|a, b| a.name.cmp(&b.name));
        std::fs::write(path, serde_json::to_string(&collections)?)?;
        tracing::info!(path = %path.display(), collections = collections.len(), "vector snapshot saved");
        Ok(())
    }

    /// 从 JSON 快照恢复索引；文件不存在时返回空索引
    pub fn load_snapshot(path: impl AsRef<Path>) -> HiveResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read_to_string(path)?;
        let collections: Vec<Collection> = serde_json::from_str(&data)?;
        let mut map = HashMap::new();
        for collection in collections {
            if let Some(bad) = collection
                .records
                .values()
                .find(|r| r.vector.len() != collection.dimensions)
            {
                return Err(HiveError::Persistence(format!(
                    "record '{}' in snapshot collection '{}' has {} dimensions, expected {}",
                    bad.id,
                    collection.name,
                    bad.vector.len(),
                    collection.dimensions
                )));
            }
            map.insert(collection.name.clone(), collection);
        }
        Ok(Self {
            collections: RwLock::new(map),
        })
    }
}

/// 余弦相似度；任一向量范数为 0 时返回 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let score = dot / (norm_a * norm_b);
    if norm_a == 0.0 || norm_b == 0.0 || !score.is_finite() {
        0.0
    } else {
        score
    }
}
