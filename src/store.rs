use crate::error::StoreError;
use std::any::{Any, type_name};
use std::collections::HashMap;
use uuid::Uuid;

/// 하나의 시나리오 실행 동안만 유지되는 키/값 저장소이다.
///
/// 시나리오 시작 시 러너가 생성하고 시나리오 종료 시 폐기한다.
/// 값은 명시적인 이름 또는 타입별 기본 키로 저장된다. 저장소는 값의
/// 자원 정리를 대신하지 않으므로 드라이버 정리는 생명주기 관리자가 담당한다.
///
/// 하나의 시나리오가 `&mut`로 독점하며 복제할 수 없다. 따라서 서로 다른
/// 시나리오가 같은 저장소를 공유하는 코드는 컴파일되지 않는다.
#[derive(Debug)]
pub struct ScenarioStore {
    /// 시나리오 실행 식별자이다.
    id: Uuid,
    /// 로그 표시용 시나리오 이름이다.
    scenario_name: String,
    /// 키별 값 저장소이다.
    entries: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl ScenarioStore {
    /// 비어 있는 시나리오 저장소를 생성한다.
    pub fn new(scenario_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scenario_name: scenario_name.into(),
            entries: HashMap::new(),
        }
    }

    /// 시나리오 실행 식별자를 반환한다.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 시나리오 이름을 반환한다.
    pub fn scenario_name(&self) -> &str {
        &self.scenario_name
    }

    /// 타입 `T`의 기본 키를 반환한다.
    pub fn default_key<T: Any>() -> &'static str {
        type_name::<T>()
    }

    /// 타입별 기본 키로 값을 저장한다. 기존 값은 덮어쓴다.
    pub fn set<T: Any + Send + Sync>(&mut self, value: T) {
        self.set_named(Self::default_key::<T>(), value);
    }

    /// 명시적인 키로 값을 저장한다. 기존 값은 덮어쓴다.
    pub fn set_named<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Box::new(value));
    }

    /// 타입별 기본 키로 저장된 값을 조회한다.
    pub fn get<T: Any>(&self) -> Result<&T, StoreError> {
        self.get_named(Self::default_key::<T>())
    }

    /// 명시적인 키로 저장된 값을 조회한다.
    ///
    /// # 반환값
    /// 키가 없으면 [`StoreError::KeyNotFound`], 타입이 다르면
    /// [`StoreError::TypeMismatch`]를 반환한다.
    pub fn get_named<T: Any>(&self, key: &str) -> Result<&T, StoreError> {
        let value = self.entries.get(key).ok_or_else(|| StoreError::KeyNotFound {
            key: key.to_string(),
        })?;
        value
            .downcast_ref::<T>()
            .ok_or_else(|| StoreError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// 타입별 기본 키로 저장된 값을 가변 참조로 조회한다.
    pub fn get_mut<T: Any>(&mut self) -> Result<&mut T, StoreError> {
        self.get_named_mut(Self::default_key::<T>())
    }

    /// 명시적인 키로 저장된 값을 가변 참조로 조회한다.
    pub fn get_named_mut<T: Any>(&mut self, key: &str) -> Result<&mut T, StoreError> {
        let value = self
            .entries
            .get_mut(key)
            .ok_or_else(|| StoreError::KeyNotFound {
                key: key.to_string(),
            })?;
        value
            .downcast_mut::<T>()
            .ok_or_else(|| StoreError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// 키를 꺼내 소유권과 함께 반환한다. 타입이 다르면 값은 그대로 남는다.
    pub fn take_named<T: Any>(&mut self, key: &str) -> Result<T, StoreError> {
        match self.entries.get(key) {
            None => {
                return Err(StoreError::KeyNotFound {
                    key: key.to_string(),
                });
            }
            Some(value) if !value.is::<T>() => {
                return Err(StoreError::TypeMismatch {
                    key: key.to_string(),
                    expected: type_name::<T>(),
                });
            }
            Some(_) => {}
        }
        let boxed = self
            .entries
            .remove(key)
            .ok_or_else(|| StoreError::KeyNotFound {
                key: key.to_string(),
            })?;
        boxed
            .downcast::<T>()
            .map(|value| *value)
            .map_err(|_| StoreError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<T>(),
            })
    }

    /// 키를 제거하고 제거 여부를 반환한다.
    pub fn remove_named(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// 키 존재 여부를 확인한다.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// 타입별 기본 키에 값이 있는지 확인한다.
    pub fn contains<T: Any>(&self) -> bool {
        self.contains_key(Self::default_key::<T>())
    }

    /// 저장된 키 목록을 반환한다. 순서는 보장하지 않는다.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|key| key.as_str())
    }

    /// 저장된 항목 수를 반환한다.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 저장소가 비었는지 여부를 확인한다.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Order {
        id: u32,
    }

    #[test]
    fn default_key_round_trip_and_overwrite() {
        let mut store = ScenarioStore::new("order");
        store.set(Order { id: 1 });
        store.set(Order { id: 2 });
        assert_eq!(store.len(), 1);
        assert_eq!(store.get::<Order>().unwrap(), &Order { id: 2 });
        assert!(store.contains::<Order>());
    }

    #[test]
    fn named_keys_are_independent_of_type_default() {
        let mut store = ScenarioStore::new("order");
        store.set_named("first", Order { id: 1 });
        store.set(Order { id: 9 });
        assert_eq!(store.get_named::<Order>("first").unwrap().id, 1);
        assert_eq!(store.get::<Order>().unwrap().id, 9);
    }

    #[test]
    fn missing_key_is_an_error_not_a_default() {
        let store = ScenarioStore::new("empty");
        let err = store.get_named::<String>("nothing").unwrap_err();
        assert_eq!(
            err,
            StoreError::KeyNotFound {
                key: "nothing".into()
            }
        );
    }

    #[test]
    fn wrong_type_is_reported_with_expected_type() {
        let mut store = ScenarioStore::new("typed");
        store.set_named("count", 3_u32);
        match store.get_named::<String>("count") {
            Err(StoreError::TypeMismatch { key, expected }) => {
                assert_eq!(key, "count");
                assert!(expected.contains("String"));
            }
            other => panic!("타입 불일치 오류가 아님: {other:?}"),
        }
    }

    #[test]
    fn take_leaves_value_in_place_on_type_mismatch() {
        let mut store = ScenarioStore::new("take");
        store.set_named("count", 3_u32);
        assert!(store.take_named::<String>("count").is_err());
        assert_eq!(store.take_named::<u32>("count").unwrap(), 3);
        assert!(!store.contains_key("count"));
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut store = ScenarioStore::new("mutate");
        store.set(Vec::<String>::new());
        store.get_mut::<Vec<String>>().unwrap().push("a".into());
        assert_eq!(store.get::<Vec<String>>().unwrap().len(), 1);
    }

    #[test]
    fn separate_stores_have_separate_identity() {
        let a = ScenarioStore::new("same");
        let b = ScenarioStore::new("same");
        assert_ne!(a.id(), b.id());
    }
}
