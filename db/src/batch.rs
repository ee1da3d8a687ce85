#[derive(Debug, Clone)]
pub enum Operation {
    Insert { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

#[derive(Debug, Default, Clone)]
pub struct Batch {
    pub operations: Vec<Operation>,
}

impl Batch {
    pub fn new() -> Self {
        Batch::default()
    }

    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.operations.push(Operation::Insert { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.operations.push(Operation::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
