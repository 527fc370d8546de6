//! 向量索引层：按集合存储 (id, vector, payload) 记录，余弦相似度最近邻检索

pub mod index;

pub use index::{cosine_similarity, Collection, Metric, Payload, Record, SearchHit, VectorIndex};
