//! Declarative list of every addressable surface the audit knows about.
//!
//! Pages may declare the service endpoints they depend on; raw API endpoints
//! are listed separately with their HTTP method. The registry is immutable
//! once built: either the compiled-in tables below or a JSON file with the
//! same shape.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEntry {
    pub path: String,
    pub name: String,
    pub name_ar: String,
    #[serde(default)]
    pub api_endpoints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEntry {
    pub endpoint: String,
    pub method: String,
    pub name: String,
    pub name_ar: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub pages: Vec<PageEntry>,
    #[serde(default)]
    pub apis: Vec<ApiEntry>,
}

impl PageEntry {
    pub fn new(path: &str, name: &str, name_ar: &str) -> Self {
        Self {
            path: path.to_string(),
            name: name.to_string(),
            name_ar: name_ar.to_string(),
            api_endpoints: Vec::new(),
            required_role: None,
        }
    }

    pub fn with_endpoints(mut self, endpoints: &[&str]) -> Self {
        self.api_endpoints = endpoints.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn with_role(mut self, role: &str) -> Self {
        self.required_role = Some(role.to_string());
        self
    }
}

impl ApiEntry {
    pub fn new(method: &str, endpoint: &str, name: &str, name_ar: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            method: method.to_uppercase(),
            name: name.to_string(),
            name_ar: name_ar.to_string(),
        }
    }
}

impl Registry {
    pub fn new(pages: Vec<PageEntry>, apis: Vec<ApiEntry>) -> Self {
        Self { pages, apis }
    }

    /// Read a registry from a JSON file of the form `{"pages": [...], "apis": [...]}`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read registry {:?}: {}", path, e))?;
        let mut registry: Registry = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid registry {:?}: {}", path, e))?;
        for api in &mut registry.apis {
            api.method = api.method.to_uppercase();
        }
        Ok(registry)
    }

    pub fn find_page(&self, path: &str) -> Option<&PageEntry> {
        self.pages.iter().find(|p| p.path == path)
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.apis.is_empty()
    }

    /// The platform surfaces compiled into the binary.
    pub fn builtin() -> Self {
        let pages = vec![
            PageEntry::new("/", "Home", "الرئيسية"),
            PageEntry::new("/dashboard", "Dashboard", "لوحة التحكم")
                .with_endpoints(&["/api/dashboard/stats", "/api/notifications"]),
            PageEntry::new("/pricing", "Pricing", "الأسعار").with_endpoints(&["/api/plans"]),
            PageEntry::new("/projects", "Projects", "المشاريع")
                .with_endpoints(&["/api/projects", "/api/projects/:id"]),
            PageEntry::new("/reports", "Reports", "التقارير")
                .with_endpoints(&["/api/reports"]),
            PageEntry::new("/settings", "Settings", "الإعدادات")
                .with_endpoints(&["/api/auth/me", "/api/settings"]),
            PageEntry::new("/billing", "Billing", "الفوترة")
                .with_endpoints(&["/api/billing/invoices", "/api/billing/subscription"]),
            PageEntry::new("/admin/users", "User Management", "إدارة المستخدمين")
                .with_endpoints(&["/api/admin/users"])
                .with_role("admin"),
            PageEntry::new("/admin/audit", "Platform Audit", "تدقيق المنصة")
                .with_endpoints(&["/api/admin/audit/runs"])
                .with_role("admin"),
        ];

        let apis = vec![
            ApiEntry::new("GET", "/api/health", "Health Check", "فحص الصحة"),
            ApiEntry::new("GET", "/api/plans", "Subscription Plans", "خطط الاشتراك"),
            ApiEntry::new("POST", "/api/auth/login", "Login", "تسجيل الدخول"),
            ApiEntry::new("POST", "/api/auth/logout", "Logout", "تسجيل الخروج"),
            ApiEntry::new("GET", "/api/projects", "List Projects", "قائمة المشاريع"),
            ApiEntry::new("POST", "/api/projects", "Create Project", "إنشاء مشروع"),
            ApiEntry::new("PUT", "/api/projects/:id", "Update Project", "تحديث مشروع"),
            ApiEntry::new("DELETE", "/api/projects/:id", "Delete Project", "حذف مشروع"),
            ApiEntry::new("POST", "/api/assistant/chat", "Assistant Chat", "محادثة المساعد"),
        ];

        Self { pages, apis }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_page_paths_are_unique() {
        let registry = Registry::builtin();
        let paths: HashSet<&str> = registry.pages.iter().map(|p| p.path.as_str()).collect();
        assert_eq!(paths.len(), registry.pages.len());
    }

    #[test]
    fn test_builtin_entries_are_bilingual() {
        let registry = Registry::builtin();
        for page in &registry.pages {
            assert!(!page.name.is_empty());
            assert!(!page.name_ar.is_empty(), "page {} has no Arabic name", page.path);
        }
        for api in &registry.apis {
            assert!(!api.name_ar.is_empty(), "api {} has no Arabic name", api.endpoint);
            assert_eq!(api.method, api.method.to_uppercase());
        }
    }

    #[test]
    fn test_find_page() {
        let registry = Registry::builtin();
        assert_eq!(registry.find_page("/pricing").map(|p| p.name.as_str()), Some("Pricing"));
        assert!(registry.find_page("/does-not-exist").is_none());
    }

    #[test]
    fn test_admin_pages_require_role() {
        let registry = Registry::builtin();
        let admin = registry.find_page("/admin/users").unwrap();
        assert_eq!(admin.required_role.as_deref(), Some("admin"));
    }

    #[test]
    fn test_deserializes_camel_case_shape() {
        let json = r#"{
            "pages": [
                {"path": "/pricing", "name": "Pricing", "nameAr": "الأسعار",
                 "apiEndpoints": ["/api/plans"], "requiredRole": "member"}
            ],
            "apis": [
                {"endpoint": "/api/plans", "method": "GET", "name": "Plans", "nameAr": "الخطط"}
            ]
        }"#;
        let registry: Registry = serde_json::from_str(json).unwrap();
        assert_eq!(registry.pages[0].api_endpoints, vec!["/api/plans".to_string()]);
        assert_eq!(registry.pages[0].required_role.as_deref(), Some("member"));
        assert_eq!(registry.apis[0].name_ar, "الخطط");
    }

    #[test]
    fn test_missing_endpoint_list_defaults_to_empty() {
        let json = r#"{"pages": [{"path": "/", "name": "Home", "nameAr": "الرئيسية"}]}"#;
        let registry: Registry = serde_json::from_str(json).unwrap();
        assert!(registry.pages[0].api_endpoints.is_empty());
        assert!(registry.apis.is_empty());
    }
}
